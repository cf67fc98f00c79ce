//! Audit event types for structured logging.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;

use crate::routing::{ExitNodeTarget, PassthroughReason};

/// Audit events for the bootstrap sequence.
///
/// The mesh credential never appears in an event; only whether one was
/// supplied.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Bootstrap started.
    BootstrapStart {
        /// Process ID of the bootstrap.
        pid: u32,
        /// Whether a mesh credential was supplied.
        credential_supplied: bool,
        /// Configured exit node, if any.
        exit_node: Option<ExitNodeTarget>,
    },

    /// Orchestrator moved to a new stage.
    StateTransition {
        /// Previous stage.
        from: &'static str,
        /// New stage.
        to: &'static str,
    },

    /// A mesh establishment attempt failed.
    MeshJoinFailed {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Failure description.
        error: String,
        /// Delay before the next attempt, `None` when giving up.
        retry_in_ms: Option<u64>,
    },

    /// The mesh connection is up.
    MeshReady {
        /// Attempts it took.
        attempts: u32,
        /// This node's mesh addresses.
        addresses: Vec<IpAddr>,
    },

    /// Exit-node routing installed.
    RoutingConfigured {
        /// The exit node.
        exit_node: ExitNodeTarget,
        /// Number of rules in the set.
        rules: usize,
    },

    /// No exit node configured.
    RoutingPassthrough {
        /// Whether the variable was unset or empty.
        reason: PassthroughReason,
    },

    /// Exit-node routing removed.
    RoutingTornDown {
        /// Number of rules removed.
        removed: usize,
    },

    /// Privileges dropped for good.
    PrivilegeDropped {
        /// New uid.
        uid: u32,
        /// New gid.
        gid: u32,
    },

    /// Handing over to the application.
    Exec {
        /// Application path.
        program: String,
        /// Number of arguments after the program name.
        argc: usize,
        /// Identity it runs as.
        uid: u32,
    },

    /// Bootstrap aborted.
    Aborted {
        /// Stage that failed.
        stage: &'static str,
        /// Process exit code.
        exit_code: u8,
        /// Failure description.
        error: String,
    },
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
