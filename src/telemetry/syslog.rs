//! Syslog integration for audit logging.

use std::sync::{Mutex, OnceLock};

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "MARMITHON_BOOTSTRAP";

/// Global audit logger instance.
static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

type SyslogWriter = syslog::Logger<syslog::LoggerBackend, Formatter3164>;

/// Audit logger that writes structured JSON events to syslog.
///
/// Uses a `Mutex` so it can log through the shared reference held in the
/// global `OnceLock`.
pub struct AuditLogger {
    /// `None` for a null logger.
    writer: Option<Mutex<SyslogWriter>>,
}

impl AuditLogger {
    /// Create a new audit logger connected to the local syslog socket.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_AUTH,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log an audit event as timestamped JSON.
    ///
    /// A null logger still renders the event to the debug log.
    pub fn log(&self, event: &AuditEvent) {
        let json = match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        debug!("Audit: {}", json);

        let Some(ref writer) = self.writer else {
            return;
        };
        match writer.lock() {
            Ok(mut writer) => {
                if let Err(e) = writer.info(&json) {
                    error!("Failed to write to syslog: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to acquire syslog writer lock: {}", e);
            }
        }
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}

/// Initialize the global audit logger against syslog.
pub fn init_logger() -> Result<(), TelemetryError> {
    let logger = AuditLogger::new()?;
    AUDIT_LOGGER
        .set(logger)
        .map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Initialize the global audit logger as a null logger.
pub fn init_null_logger() -> Result<(), TelemetryError> {
    AUDIT_LOGGER
        .set(AuditLogger::new_null())
        .map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Get the global audit logger, if initialized.
pub fn try_audit() -> Option<&'static AuditLogger> {
    AUDIT_LOGGER.get()
}

/// Record `event` on the global audit logger.
///
/// Does nothing before initialization, so library code and tests can emit
/// events unconditionally.
pub fn audit(event: AuditEvent) {
    if let Some(logger) = try_audit() {
        logger.log(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syslog_tag() {
        assert_eq!(SYSLOG_TAG, "MARMITHON_BOOTSTRAP");
    }

    #[test]
    fn test_null_logger_discards() {
        let logger = AuditLogger::new_null();
        assert!(logger.is_null());
        logger.log(&AuditEvent::PrivilegeDropped {
            uid: 65532,
            gid: 65532,
        });
    }

    #[test]
    fn test_audit_before_init_is_harmless() {
        audit(AuditEvent::RoutingTornDown { removed: 0 });
    }

    #[test]
    #[ignore = "Requires running syslog daemon"]
    fn test_logger_creation() {
        let logger = AuditLogger::new().unwrap();
        assert!(!logger.is_null());
        logger.log(&AuditEvent::RoutingTornDown { removed: 3 });
    }
}
