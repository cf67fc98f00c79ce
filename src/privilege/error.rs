//! Error types for identity switching and the final exec.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while moving from the privileged to the unprivileged identity.
///
/// Every variant is fatal: a rejected identity switch is a deployment defect,
/// not a transient condition.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// The target identity is not usable (root ids, unknown uid).
    #[error("Identity {uid}:{gid} is invalid: {reason}")]
    IdentityInvalid {
        /// Target user id.
        uid: u32,
        /// Target group id.
        gid: u32,
        /// Why the identity was rejected.
        reason: String,
    },

    /// The operating system rejected one of the identity syscalls.
    #[error("{call} was denied: {source}")]
    SyscallDenied {
        /// Name of the rejected call.
        call: &'static str,
        /// Errno returned by the kernel.
        #[source]
        source: nix::Error,
    },

    /// The orchestrator was not started as root.
    #[error("Bootstrap must start as root (effective uid is {euid})")]
    NotPrivileged {
        /// Effective uid observed at startup.
        euid: u32,
    },

    /// Root could be regained after the drop.
    #[error("Privileges could be regained after dropping to uid {uid}")]
    Reacquired {
        /// The uid the process dropped to.
        uid: u32,
    },
}

/// Errors raised while replacing the process image with the application.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Could not enter the application working directory.
    #[error("Failed to enter working directory {path}: {source}")]
    WorkDir {
        /// Working directory.
        path: PathBuf,
        /// Underlying errno.
        #[source]
        source: nix::Error,
    },

    /// An argument or environment entry contained an interior NUL byte.
    #[error("Argument contains a NUL byte: {0}")]
    InvalidArgument(String),

    /// execve(2) returned.
    #[error("Failed to exec {program}: {source}")]
    Exec {
        /// Program that could not be executed.
        program: PathBuf,
        /// Underlying errno.
        #[source]
        source: nix::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_invalid_display() {
        let err = PrivilegeError::IdentityInvalid {
            uid: 0,
            gid: 65532,
            reason: "target uid is root".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0:65532"));
        assert!(msg.contains("target uid is root"));
    }

    #[test]
    fn test_syscall_denied_display() {
        let err = PrivilegeError::SyscallDenied {
            call: "setresuid",
            source: nix::Error::EPERM,
        };
        assert!(err.to_string().starts_with("setresuid was denied"));
    }

    #[test]
    fn test_exec_error_display() {
        let err = ExecError::Exec {
            program: PathBuf::from("/app/marmithon"),
            source: nix::Error::ENOENT,
        };
        assert!(err.to_string().contains("/app/marmithon"));
    }
}
