//! Mesh connection supervisor.
//!
//! Owns the daemon handle and the connection state machine:
//!
//! ```text
//! Down ──► Authenticating ──► Connecting ──► Up
//!   │            │                 │
//!   └────────────┴─────────────────┴──► Failed
//! ```
//!
//! Transitions are driven by polling the daemon status. A state is recorded
//! only when it changes, so `Up` appears at most once per supervisor.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::control::MeshControl;
use super::credential::MeshCredential;
use super::error::SupervisorError;
use super::handle::DaemonHandle;
use super::status::{MeshConnectionState, MeshStatus};
use crate::config::MeshSettings;

/// Supervises one mesh daemon.
pub struct MeshSupervisor<C: MeshControl> {
    control: C,
    poll_interval: Duration,
    join_timeout: Duration,
    daemon: Option<DaemonHandle>,
    state: MeshConnectionState,
    credential_supplied: bool,
    transitions: Vec<MeshConnectionState>,
}

impl<C: MeshControl> MeshSupervisor<C> {
    /// Create a supervisor. Nothing is started until [`Self::start`].
    pub fn new(control: C, settings: &MeshSettings) -> Self {
        Self {
            control,
            poll_interval: settings.poll_interval(),
            join_timeout: settings.ready_timeout(),
            daemon: None,
            state: MeshConnectionState::Down,
            credential_supplied: false,
            transitions: Vec::new(),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> MeshConnectionState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn transitions(&self) -> &[MeshConnectionState] {
        &self.transitions
    }

    /// Start the daemon and, with a credential, ask it to join the mesh.
    ///
    /// Without a credential the daemon is assumed to be authorized already
    /// and is only started. Calling this again reuses a daemon that is still
    /// running and replaces one that has exited. Once the connection is up
    /// further calls change nothing.
    pub async fn start(
        &mut self,
        credential: Option<&MeshCredential>,
    ) -> Result<&DaemonHandle, SupervisorError> {
        let handle = match self.daemon.take() {
            Some(mut handle) => {
                if handle.is_running() {
                    debug!(
                        "Reusing running mesh daemon ({})",
                        if handle.is_managed() { "managed" } else { "external" }
                    );
                    handle
                } else {
                    warn!("Mesh daemon exited, starting a new one");
                    self.control.spawn_daemon().await?
                }
            }
            None => self.control.spawn_daemon().await?,
        };
        self.daemon = Some(handle);
        self.credential_supplied = credential.is_some();

        if self.state == MeshConnectionState::Up {
            debug!("Mesh already up, start is a no-op");
        } else if let Some(credential) = credential {
            self.transition(MeshConnectionState::Authenticating);
            match tokio::time::timeout(self.join_timeout, self.control.join(credential)).await {
                Ok(Ok(())) => debug!("Join accepted"),
                Ok(Err(e)) => {
                    if matches!(e, SupervisorError::AuthRejected { .. }) {
                        self.transition(MeshConnectionState::Failed);
                    }
                    return Err(e);
                }
                Err(_) => {
                    return Err(SupervisorError::Timeout {
                        waited: self.join_timeout,
                        last_state: self.state,
                    });
                }
            }
        } else {
            info!("No mesh credential, expecting a pre-authorized daemon");
        }

        self.daemon
            .as_ref()
            .ok_or_else(|| SupervisorError::unavailable("daemon handle lost"))
    }

    /// Wait until the connection is up or `timeout` elapses.
    ///
    /// Returns immediately when already up. Status errors while waiting are
    /// tolerated since the daemon may still be initializing; if the daemon
    /// stayed unreachable until the deadline the error is
    /// [`SupervisorError::DaemonUnavailable`] rather than a timeout.
    pub async fn await_ready(&mut self, timeout: Duration) -> Result<(), SupervisorError> {
        if self.state == MeshConnectionState::Up {
            debug!("Mesh already up");
            return Ok(());
        }

        let mut last_error: Option<SupervisorError> = None;
        let outcome = tokio::time::timeout(timeout, self.poll_until_up(&mut last_error)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(match last_error {
                Some(SupervisorError::DaemonUnavailable { reason }) => {
                    SupervisorError::DaemonUnavailable {
                        reason: format!("unreachable for {:?}: {}", timeout, reason),
                    }
                }
                _ => SupervisorError::Timeout {
                    waited: timeout,
                    last_state: self.state,
                },
            }),
        }
    }

    /// Current mesh status, including the peer list.
    pub async fn peers(&self) -> Result<MeshStatus, SupervisorError> {
        self.control.status().await
    }

    async fn poll_until_up(
        &mut self,
        last_error: &mut Option<SupervisorError>,
    ) -> Result<(), SupervisorError> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Some(handle) = self.daemon.as_mut()
                && let Some(status) = handle.try_wait()?
            {
                self.transition(MeshConnectionState::Down);
                return Err(SupervisorError::unavailable(format!(
                    "daemon exited ({})",
                    status
                )));
            }

            let status = match self.control.status().await {
                Ok(status) => {
                    *last_error = None;
                    status
                }
                Err(e) => {
                    trace!("Status poll failed: {}", e);
                    *last_error = Some(e);
                    continue;
                }
            };

            let next = status.connection_state(self.credential_supplied);
            self.transition(next);
            match next {
                MeshConnectionState::Up => return Ok(()),
                MeshConnectionState::Failed => {
                    let reason = match status.auth_url {
                        Some(url) => format!("daemon needs login ({}) and no credential was supplied", url),
                        None => "daemon needs login and no credential was supplied".to_string(),
                    };
                    return Err(SupervisorError::AuthRejected { reason });
                }
                _ => {}
            }
        }
    }

    fn transition(&mut self, next: MeshConnectionState) {
        if next == self.state {
            return;
        }
        info!("Mesh {} -> {}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }
}
