//! Exponential backoff with jitter between mesh join attempts.

use rand::Rng;
use std::time::Duration;

/// Delay before retry number `retry` (1 for the first retry).
///
/// `base * 2^(retry - 1)` plus up to 10% jitter, never more than `max`.
pub fn retry_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);

    let exponential = 2u64.saturating_pow(retry - 1);
    let delay_ms = base_ms.saturating_mul(exponential).min(max_ms);

    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_secs(30);

        let first = retry_delay(1, base, max);
        assert!(first >= Duration::from_millis(1000) && first < Duration::from_millis(1100));

        let second = retry_delay(2, base, max);
        assert!(second >= Duration::from_millis(2000) && second < Duration::from_millis(2200));
    }

    #[test]
    fn test_delay_is_capped() {
        let max = Duration::from_secs(5);
        assert_eq!(retry_delay(12, Duration::from_secs(1), max), max);
        assert_eq!(retry_delay(u32::MAX, Duration::from_secs(1), max), max);
    }

    #[test]
    fn test_no_delay_before_first_attempt() {
        assert_eq!(
            retry_delay(0, Duration::from_secs(1), Duration::from_secs(5)),
            Duration::ZERO
        );
    }
}
