//! Driving the mesh daemon and its CLI.
//!
//! [`MeshControl`] is the seam between the supervisor's state machine and
//! the processes it drives. [`TailscaleControl`] is the real implementation:
//! it spawns `tailscaled` and talks to it through the `tailscale` CLI over
//! the daemon socket.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, trace};

use super::credential::MeshCredential;
use super::error::SupervisorError;
use super::handle::DaemonHandle;
use super::status::MeshStatus;
use crate::config::MeshSettings;

/// Interval between checks for the daemon socket after spawning.
const SOCKET_POLL: Duration = Duration::from_millis(100);

/// Fragments of `tailscale up` output that mean the key itself was refused.
const AUTH_REJECTION_MARKERS: &[&str] = &[
    "invalid key",
    "auth key",
    "authkey",
    "not valid",
    "expired",
    "unauthorized",
    "revoked",
];

/// Operations the supervisor needs from the mesh daemon.
#[allow(async_fn_in_trait)]
pub trait MeshControl {
    /// Start the daemon, or attach to one that is already managed
    /// elsewhere, and wait until it accepts commands.
    async fn spawn_daemon(&self) -> Result<DaemonHandle, SupervisorError>;

    /// Ask the daemon to join the mesh with `credential`.
    async fn join(&self, credential: &MeshCredential) -> Result<(), SupervisorError>;

    /// Read the daemon's current status.
    async fn status(&self) -> Result<MeshStatus, SupervisorError>;
}

/// [`MeshControl`] backed by the `tailscaled` and `tailscale` binaries.
#[derive(Debug, Clone)]
pub struct TailscaleControl {
    settings: MeshSettings,
}

impl TailscaleControl {
    /// Create a controller for the given mesh settings.
    pub fn new(settings: MeshSettings) -> Self {
        Self { settings }
    }

    fn daemon_args(&self) -> Vec<String> {
        let state_dir = self.settings.state_dir.display();
        let mut args = vec![
            format!("--state={}/tailscaled.state", state_dir),
            format!("--statedir={}", state_dir),
            format!("--socket={}", self.settings.socket.display()),
            format!("--tun={}", self.settings.tun),
        ];
        args.extend(self.settings.daemon_args.iter().cloned());
        args
    }

    fn up_args(&self, credential: &MeshCredential) -> Vec<String> {
        let mut args = vec![
            format!("--socket={}", self.settings.socket.display()),
            "up".to_string(),
            format!("--authkey={}", credential.expose()),
        ];
        if let Some(ref hostname) = self.settings.hostname {
            args.push(format!("--hostname={}", hostname));
        }
        args.extend(self.settings.up_args.iter().cloned());
        args
    }

    fn cli(&self) -> Command {
        let mut cmd = Command::new(&self.settings.cli_binary);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn wait_for_socket(&self, handle: &mut DaemonHandle) -> Result<(), SupervisorError> {
        let socket = self.settings.socket.as_path();
        let deadline = tokio::time::Instant::now() + self.settings.daemon_start_timeout();

        loop {
            if socket.exists() {
                debug!("Daemon socket ready at {:?}", socket);
                return Ok(());
            }
            if let Some(status) = handle.try_wait()? {
                return Err(SupervisorError::unavailable(format!(
                    "daemon exited during startup ({})",
                    status
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::unavailable(format!(
                    "socket {:?} did not appear within {:?}",
                    socket,
                    self.settings.daemon_start_timeout()
                )));
            }
            tokio::time::sleep(SOCKET_POLL).await;
        }
    }
}

impl MeshControl for TailscaleControl {
    async fn spawn_daemon(&self) -> Result<DaemonHandle, SupervisorError> {
        if !self.settings.manage_daemon {
            debug!("Daemon managed externally, using socket {:?}", self.settings.socket);
            return Ok(DaemonHandle::external());
        }

        prepare_dirs(&self.settings.state_dir, &self.settings.socket).await?;

        let args = self.daemon_args();
        debug!(
            "Running: {} {}",
            self.settings.daemon_binary.display(),
            args.join(" ")
        );
        let child = Command::new(&self.settings.daemon_binary)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                SupervisorError::unavailable(format!(
                    "cannot spawn {}: {}",
                    self.settings.daemon_binary.display(),
                    e
                ))
            })?;

        let mut handle = DaemonHandle::spawned(child);
        self.wait_for_socket(&mut handle).await?;
        info!("Mesh daemon started (pid {:?})", handle.pid);
        Ok(handle)
    }

    async fn join(&self, credential: &MeshCredential) -> Result<(), SupervisorError> {
        debug!(
            "Running: {} up (credential {:?})",
            self.settings.cli_binary.display(),
            credential
        );
        let output = self
            .cli()
            .args(self.up_args(credential))
            .output()
            .await
            .map_err(|e| SupervisorError::unavailable(format!("cannot run mesh CLI: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_join_failure(&stderr))
    }

    async fn status(&self) -> Result<MeshStatus, SupervisorError> {
        let output = self
            .cli()
            .arg(format!("--socket={}", self.settings.socket.display()))
            .args(["status", "--json"])
            .output()
            .await
            .map_err(|e| SupervisorError::unavailable(format!("cannot run mesh CLI: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match MeshStatus::parse(&stdout) {
            Ok(status) => Ok(status),
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                trace!("Unparseable status output: {}", stdout);
                Err(SupervisorError::unavailable(if stderr.trim().is_empty() {
                    format!("unparseable status: {}", e)
                } else {
                    stderr.trim().to_string()
                }))
            }
        }
    }
}

/// Create the state directory and the socket's parent, removing a socket
/// left behind by a previous run.
async fn prepare_dirs(state_dir: &Path, socket: &Path) -> Result<(), SupervisorError> {
    create_dir(state_dir).await?;
    if let Some(parent) = socket.parent() {
        create_dir(parent).await?;
    }

    match tokio::fs::remove_file(socket).await {
        Ok(()) => debug!("Removed stale socket {:?}", socket),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(SupervisorError::unavailable(format!(
                "cannot remove stale socket {:?}: {}",
                socket, e
            )));
        }
    }
    Ok(())
}

async fn create_dir(dir: &Path) -> Result<(), SupervisorError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| SupervisorError::unavailable(format!("cannot create {:?}: {}", dir, e)))
}

/// Decide whether a failed `up` was the credential's fault.
fn classify_join_failure(stderr: &str) -> SupervisorError {
    let lowered = stderr.to_lowercase();
    if AUTH_REJECTION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        SupervisorError::AuthRejected {
            reason: stderr.to_string(),
        }
    } else {
        SupervisorError::unavailable(format!("join failed: {}", stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn settings() -> MeshSettings {
        MeshSettings {
            hostname: Some("marmithon".to_string()),
            up_args: vec!["--accept-dns=false".to_string()],
            ..MeshSettings::default()
        }
    }

    #[test]
    fn test_daemon_args() {
        let control = TailscaleControl::new(settings());
        let args = control.daemon_args();

        assert_eq!(args[0], "--state=/var/lib/tailscale/tailscaled.state");
        assert!(args.contains(&"--socket=/var/run/tailscale/tailscaled.sock".to_string()));
        assert!(args.contains(&"--tun=tailscale0".to_string()));
    }

    #[test]
    fn test_up_args_carry_credential_and_hostname() {
        let control = TailscaleControl::new(settings());
        let credential = MeshCredential::new("tskey-auth-abc").unwrap();
        let args = control.up_args(&credential);

        assert_eq!(args[1], "up");
        assert!(args.contains(&"--authkey=tskey-auth-abc".to_string()));
        assert!(args.contains(&"--hostname=marmithon".to_string()));
        assert_eq!(args.last().unwrap(), "--accept-dns=false");
    }

    #[test]
    fn test_classify_join_failure() {
        assert!(matches!(
            classify_join_failure("backend error: invalid key: unable to validate API key"),
            SupervisorError::AuthRejected { .. }
        ));
        assert!(matches!(
            classify_join_failure("failed to connect to local tailscaled; it doesn't appear to be running"),
            SupervisorError::DaemonUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_external_daemon_is_not_spawned() {
        let control = TailscaleControl::new(MeshSettings {
            manage_daemon: false,
            daemon_binary: PathBuf::from("/nonexistent/tailscaled"),
            ..MeshSettings::default()
        });

        let handle = control.spawn_daemon().await.unwrap();
        assert!(!handle.is_managed());
    }

    #[tokio::test]
    async fn test_missing_daemon_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let control = TailscaleControl::new(MeshSettings {
            daemon_binary: PathBuf::from("/nonexistent/tailscaled"),
            state_dir: dir.path().join("state"),
            socket: dir.path().join("run/tailscaled.sock"),
            ..MeshSettings::default()
        });

        let err = control.spawn_daemon().await.unwrap_err();
        assert!(matches!(err, SupervisorError::DaemonUnavailable { .. }));
        assert!(dir.path().join("state").is_dir());
    }

    #[tokio::test]
    async fn test_daemon_exiting_early_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let control = TailscaleControl::new(MeshSettings {
            daemon_binary: PathBuf::from("false"),
            state_dir: dir.path().join("state"),
            socket: dir.path().join("tailscaled.sock"),
            daemon_start_timeout_secs: 5,
            ..MeshSettings::default()
        });

        let err = control.spawn_daemon().await.unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
    }
}
