//! Error types for exit-node routing.

use thiserror::Error;

use super::target::ExitNodeTarget;

/// Errors from installing or removing exit-node routing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No mesh peer carries the target address.
    #[error("Exit node {target} is not a known mesh peer")]
    UnknownPeer {
        /// The configured target.
        target: ExitNodeTarget,
    },

    /// The peer exists but cannot serve as exit node right now.
    #[error("Exit node {target} ({host_name}) is unavailable: {reason}")]
    PeerUnavailable {
        /// The configured target.
        target: ExitNodeTarget,
        /// Host name of the matching peer.
        host_name: String,
        /// Why the peer was refused.
        reason: &'static str,
    },

    /// A rule could not be installed. Every rule of the set that was in
    /// place, including pre-existing ones, was rolled back.
    #[error("Failed to install `{rule}` ({rolled_back} rules rolled back): {source}")]
    RuleInstallFailed {
        /// The rule that failed, rendered as a command.
        rule: String,
        /// How many rules were removed again.
        rolled_back: usize,
        /// The backend failure.
        #[source]
        source: BackendError,
    },

    /// A rule could not be removed.
    #[error("Failed to remove `{rule}`: {source}")]
    RuleRemoveFailed {
        /// The rule that failed, rendered as a command.
        rule: String,
        /// The backend failure.
        #[source]
        source: BackendError,
    },
}

/// Failures of a single rule operation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The command could not be started.
    #[error("Failed to execute '{cmd}': {source}")]
    CommandFailed {
        /// The command line.
        cmd: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The command ran and reported failure.
    #[error("Command '{cmd}' failed: {stderr}")]
    CommandError {
        /// The command line.
        cmd: String,
        /// Its standard error.
        stderr: String,
    },

    /// The in-memory backend was told to refuse this rule.
    #[error("Rule refused: {rule}")]
    Refused {
        /// The refused rule.
        rule: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_failure_display() {
        let err = ConfigError::RuleInstallFailed {
            rule: "ip -4 rule add fwmark 0x1000 lookup 7070 priority 5000".to_string(),
            rolled_back: 2,
            source: BackendError::CommandError {
                cmd: "ip -4 rule add".to_string(),
                stderr: "RTNETLINK answers: Operation not permitted".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("2 rules rolled back"));
        assert!(msg.contains("Operation not permitted"));
    }

    #[test]
    fn test_unknown_peer_display() {
        let err = ConfigError::UnknownPeer {
            target: ExitNodeTarget::new("100.64.0.7".parse().unwrap()),
        };
        assert_eq!(err.to_string(), "Exit node 100.64.0.7 is not a known mesh peer");
    }
}
