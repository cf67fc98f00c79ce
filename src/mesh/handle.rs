//! Handle to the mesh daemon process.

use std::process::ExitStatus;
use tokio::process::Child;

use super::error::SupervisorError;

/// Handle to the mesh daemon.
///
/// The daemon outlives the bootstrap: dropping the handle neither kills nor
/// waits for it, and after the exec the application inherits it as a child.
#[derive(Debug)]
pub struct DaemonHandle {
    child: Option<Child>,
    /// PID of the daemon, when we spawned it.
    pub pid: Option<u32>,
}

impl DaemonHandle {
    /// Wrap a daemon we spawned.
    pub fn spawned(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Some(child),
            pid,
        }
    }

    /// A daemon managed by someone else (sidecar, init system).
    pub fn external() -> Self {
        Self {
            child: None,
            pid: None,
        }
    }

    /// Whether this process owns the daemon.
    pub fn is_managed(&self) -> bool {
        self.child.is_some()
    }

    /// Get the exit status if the daemon has exited, without blocking.
    ///
    /// External daemons are never observed as exited.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        match self.child.as_mut() {
            Some(child) => child
                .try_wait()
                .map_err(|e| SupervisorError::unavailable(format!("cannot poll daemon: {}", e))),
            None => Ok(None),
        }
    }

    /// Check if the daemon is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_handle_is_always_running() {
        let mut handle = DaemonHandle::external();
        assert!(!handle.is_managed());
        assert!(handle.is_running());
        assert!(handle.pid.is_none());
    }

    #[tokio::test]
    async fn test_spawned_handle_observes_exit() {
        let child = tokio::process::Command::new("true").spawn().unwrap();
        let mut handle = DaemonHandle::spawned(child);
        assert!(handle.is_managed());
        assert!(handle.pid.is_some());

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(!handle.is_running());
    }
}
