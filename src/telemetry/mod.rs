//! Telemetry and audit logging for the bootstrap.
//!
//! Two separate channels:
//!
//! - **Diagnostics** (`tracing`): human-readable progress on stderr, which
//!   ends up in the container log.
//! - **Audit trail** (syslog, tag `MARMITHON_BOOTSTRAP`): one JSON event per
//!   security-relevant step: mesh join, routing changes, privilege drop and
//!   the final exec.
//!
//! Containers rarely run a syslog daemon, so a failed connection falls back
//! to a null logger instead of aborting the bootstrap.
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-03-02T09:14:27Z","event":"privilege_dropped","uid":65532,"gid":65532}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::AuditEvent;
pub use self::syslog::{AuditLogger, SYSLOG_TAG, audit, init_logger, init_null_logger, try_audit};
