//! Error types for mesh daemon supervision.

use std::time::Duration;
use thiserror::Error;

use super::status::MeshConnectionState;

/// Errors from starting the mesh daemon or waiting for the connection.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The daemon reported an authentication failure.
    #[error("Mesh authentication rejected: {reason}")]
    AuthRejected {
        /// What the daemon reported.
        reason: String,
    },

    /// The connection did not come up before the deadline.
    #[error("Mesh not ready after {waited:?} (last state: {last_state})")]
    Timeout {
        /// How long we waited.
        waited: Duration,
        /// Last state observed before giving up.
        last_state: MeshConnectionState,
    },

    /// The daemon could not be started or reached.
    #[error("Mesh daemon unavailable: {reason}")]
    DaemonUnavailable {
        /// Description of the failure.
        reason: String,
    },
}

impl SupervisorError {
    /// Whether retrying the mesh join could plausibly succeed.
    ///
    /// A rejected credential stays rejected.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthRejected { .. })
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::DaemonUnavailable {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = SupervisorError::Timeout {
            waited: Duration::from_secs(30),
            last_state: MeshConnectionState::Connecting,
        };
        let msg = err.to_string();
        assert!(msg.contains("30s"));
        assert!(msg.contains("connecting"));
    }

    #[test]
    fn test_auth_rejection_is_not_transient() {
        let err = SupervisorError::AuthRejected {
            reason: "invalid key".to_string(),
        };
        assert!(!err.is_transient());
        assert!(SupervisorError::unavailable("socket missing").is_transient());
    }
}
