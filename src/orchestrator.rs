//! Bootstrap orchestration.
//!
//! Sequences the components and hands the process over to the application:
//!
//! ```text
//! Init → MeshStarting → MeshReady → RoutingConfiguring → RoutingReady
//!      → PrivilegeDropping → Exec
//!
//! any failure → Aborted(stage, error)
//! ```
//!
//! The mesh phases are async and run on a current-thread runtime that is
//! gone before privileges are dropped. Everything after is synchronous, so
//! no task can outlive the drop or observe the identity change.

use std::convert::Infallible;
use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::backoff;
use crate::config::{BootstrapEnv, MeshSettings, Settings};
use crate::exit_code;
use crate::mesh::{MeshControl, MeshCredential, MeshStatus, MeshSupervisor, SupervisorError, TailscaleControl};
use crate::privilege::{
    AppCommand, ExecError, IdentitySwitch, PrivilegeContext, PrivilegeError, SystemIdentity,
    Unprivileged, exec_as,
};
use crate::routing::{
    CommandBackend, ConfigError, ExitNodeSetting, PassthroughReason, RoutingConfigurator,
    RoutingRuleSet, RuleBackend,
};
use crate::telemetry::{AuditEvent, audit};

/// Stages of the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Nothing done yet.
    Init,
    /// Starting the daemon and joining the mesh.
    MeshStarting,
    /// Mesh connection up.
    MeshReady,
    /// Installing exit-node routing.
    RoutingConfiguring,
    /// Routing in place (or passed through).
    RoutingReady,
    /// Switching to the unprivileged identity.
    PrivilegeDropping,
    /// Ready to exec the application.
    Exec,
    /// Failed.
    Aborted,
}

impl BootstrapState {
    /// Stable snake_case name, as used in audit events.
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::MeshStarting => "mesh_starting",
            Self::MeshReady => "mesh_ready",
            Self::RoutingConfiguring => "routing_configuring",
            Self::RoutingReady => "routing_ready",
            Self::PrivilegeDropping => "privilege_dropping",
            Self::Exec => "exec",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Any error that ends the bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Mesh supervision failed.
    #[error(transparent)]
    Mesh(#[from] SupervisorError),

    /// Routing configuration failed.
    #[error(transparent)]
    Routing(#[from] ConfigError),

    /// The privilege drop failed.
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    /// The application could not be executed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The async runtime could not be built.
    #[error("Failed to create tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl BootstrapError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Mesh(SupervisorError::AuthRejected { .. }) => exit_code::MESH_AUTH_REJECTED,
            Self::Mesh(SupervisorError::Timeout { .. }) => exit_code::MESH_TIMEOUT,
            Self::Mesh(SupervisorError::DaemonUnavailable { .. }) => {
                exit_code::MESH_DAEMON_UNAVAILABLE
            }
            Self::Routing(ConfigError::UnknownPeer { .. }) => exit_code::ROUTING_UNKNOWN_PEER,
            Self::Routing(ConfigError::PeerUnavailable { .. }) => {
                exit_code::ROUTING_PEER_UNAVAILABLE
            }
            Self::Routing(ConfigError::RuleInstallFailed { .. }) => {
                exit_code::ROUTING_INSTALL_FAILED
            }
            Self::Routing(ConfigError::RuleRemoveFailed { .. }) => exit_code::ROUTING_REMOVE_FAILED,
            Self::Privilege(PrivilegeError::IdentityInvalid { .. }) => exit_code::IDENTITY_INVALID,
            Self::Privilege(PrivilegeError::SyscallDenied { .. }) => exit_code::SYSCALL_DENIED,
            Self::Privilege(PrivilegeError::NotPrivileged { .. }) => exit_code::NOT_PRIVILEGED,
            Self::Privilege(PrivilegeError::Reacquired { .. }) => exit_code::PRIVILEGE_REACQUIRED,
            Self::Exec(_) => exit_code::EXEC_FAILED,
            Self::Runtime(_) => exit_code::RUNTIME,
        }
    }
}

/// A bootstrap that stopped before the exec.
#[derive(Debug)]
pub struct Aborted {
    /// Stage during which it failed.
    pub stage: BootstrapState,
    /// The originating error.
    pub error: BootstrapError,
    /// Every stage entered, ending with [`BootstrapState::Aborted`].
    pub trail: Vec<BootstrapState>,
}

impl Aborted {
    /// Process exit code.
    pub fn exit_code(&self) -> u8 {
        self.error.exit_code()
    }
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bootstrap aborted during {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for Aborted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Everything needed to become the application.
///
/// Only a completed bootstrap produces one, and it carries the
/// [`Unprivileged`] token, so an exec before the privilege drop does not
/// type-check.
#[derive(Debug)]
pub struct Handoff {
    identity: Unprivileged,
    command: AppCommand,
    rules: RoutingRuleSet,
    trail: Vec<BootstrapState>,
}

impl Handoff {
    /// The application invocation.
    pub fn command(&self) -> &AppCommand {
        &self.command
    }

    /// The identity the application will run as.
    pub fn identity(&self) -> &Unprivileged {
        &self.identity
    }

    /// Routing rules in place for the application.
    pub fn rules(&self) -> &RoutingRuleSet {
        &self.rules
    }

    /// Every stage entered, ending with [`BootstrapState::Exec`].
    pub fn trail(&self) -> &[BootstrapState] {
        &self.trail
    }

    /// Replace this process with the application. Returns only on failure.
    pub fn exec(self) -> Result<Infallible, ExecError> {
        audit(AuditEvent::Exec {
            program: self.command.program.display().to_string(),
            argc: self.command.args.len(),
            uid: self.identity.identity().uid,
        });
        exec_as(self.identity, &self.command)
    }
}

/// The bootstrap state machine.
pub struct Orchestrator<C: MeshControl, B: RuleBackend, S: IdentitySwitch> {
    settings: Settings,
    env: BootstrapEnv,
    supervisor: MeshSupervisor<C>,
    routing: RoutingConfigurator<B>,
    privilege: PrivilegeContext<S>,
    app_args: Vec<String>,
    inherited_env: Vec<(OsString, OsString)>,
}

impl Orchestrator<TailscaleControl, CommandBackend, SystemIdentity> {
    /// Orchestrator driving the real daemon, networking tools and kernel.
    pub fn system(
        settings: Settings,
        env: BootstrapEnv,
        privilege: PrivilegeContext<SystemIdentity>,
    ) -> Self {
        let control = TailscaleControl::new(settings.mesh.clone());
        let backend = CommandBackend::new(&settings);
        Self::new(settings, env, control, backend, privilege)
    }
}

impl<C: MeshControl, B: RuleBackend, S: IdentitySwitch> Orchestrator<C, B, S> {
    /// Assemble an orchestrator from its parts.
    ///
    /// The application inherits this process's environment unless
    /// [`Self::with_inherited_env`] says otherwise.
    pub fn new(
        settings: Settings,
        env: BootstrapEnv,
        control: C,
        backend: B,
        privilege: PrivilegeContext<S>,
    ) -> Self {
        let supervisor = MeshSupervisor::new(control, &settings.mesh);
        let routing = RoutingConfigurator::new(backend, &settings);
        Self {
            settings,
            env,
            supervisor,
            routing,
            privilege,
            app_args: Vec::new(),
            inherited_env: std::env::vars_os().collect(),
        }
    }

    /// Application arguments replacing `app.args`.
    #[must_use]
    pub fn with_app_args(mut self, args: Vec<String>) -> Self {
        self.app_args = args;
        self
    }

    /// Environment the application inherits before scrubbing.
    #[must_use]
    pub fn with_inherited_env<I>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        self.inherited_env = env.into_iter().collect();
        self
    }

    /// Run every stage up to the exec.
    pub fn run(self) -> Result<Handoff, Aborted> {
        let Self {
            settings,
            env,
            mut supervisor,
            mut routing,
            privilege,
            app_args,
            inherited_env,
        } = self;
        let mut progress = Progress::new();

        audit(AuditEvent::BootstrapStart {
            pid: std::process::id(),
            credential_supplied: env.credential.is_some(),
            exit_node: env.exit_node.target(),
        });

        progress.advance(BootstrapState::MeshStarting);
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => return Err(progress.abort(BootstrapError::Runtime(e))),
        };
        let mesh = runtime.block_on(establish_mesh(
            &mut supervisor,
            &settings.mesh,
            env.credential.as_ref(),
        ));
        drop(runtime);
        let status = match mesh {
            Ok(status) => status,
            Err(e) => return Err(progress.abort(e.into())),
        };
        progress.advance(BootstrapState::MeshReady);

        progress.advance(BootstrapState::RoutingConfiguring);
        let rules = match env.exit_node {
            ExitNodeSetting::Target(target) => match routing.apply(target, &status) {
                Ok(rules) => {
                    audit(AuditEvent::RoutingConfigured {
                        exit_node: target,
                        rules: rules.len(),
                    });
                    rules
                }
                Err(e) => return Err(progress.abort(e.into())),
            },
            ExitNodeSetting::Unset => passthrough(&routing, PassthroughReason::Unset),
            ExitNodeSetting::Empty => passthrough(&routing, PassthroughReason::Empty),
        };
        progress.advance(BootstrapState::RoutingReady);

        progress.advance(BootstrapState::PrivilegeDropping);
        let command = AppCommand::resolve(&settings.app, &settings.identity, &app_args, inherited_env);
        let identity = match privilege.drop_to(&settings.identity) {
            Ok(identity) => identity,
            Err(e) => {
                if let Err(teardown) = routing.teardown(&rules) {
                    warn!("Routing left in place after failed privilege drop: {}", teardown);
                }
                return Err(progress.abort(e.into()));
            }
        };
        audit(AuditEvent::PrivilegeDropped {
            uid: settings.identity.uid,
            gid: settings.identity.gid,
        });

        progress.advance(BootstrapState::Exec);
        Ok(Handoff {
            identity,
            command,
            rules,
            trail: progress.trail,
        })
    }
}

fn passthrough<B: RuleBackend>(
    routing: &RoutingConfigurator<B>,
    reason: PassthroughReason,
) -> RoutingRuleSet {
    audit(AuditEvent::RoutingPassthrough { reason });
    routing.noop(reason)
}

/// Start the mesh and wait for it, retrying transient failures with
/// exponential backoff. Returns the status snapshot taken once up.
async fn establish_mesh<C: MeshControl>(
    supervisor: &mut MeshSupervisor<C>,
    mesh: &MeshSettings,
    credential: Option<&MeshCredential>,
) -> Result<MeshStatus, SupervisorError> {
    let attempts = mesh.join_attempts.max(1);
    let timeout = mesh.ready_timeout();
    let base = Duration::from_millis(mesh.backoff_base_ms);

    let mut attempt = 1;
    loop {
        let outcome = match supervisor.start(credential).await {
            Ok(_) => match supervisor.await_ready(timeout).await {
                Ok(()) => supervisor.peers().await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(status) => {
                info!(
                    "Mesh up after {} attempt(s), addresses {:?}",
                    attempt, status.self_addresses
                );
                for warning in &status.health {
                    warn!("Mesh health: {}", warning);
                }
                audit(AuditEvent::MeshReady {
                    attempts: attempt,
                    addresses: status.self_addresses.clone(),
                });
                return Ok(status);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = backoff::retry_delay(attempt, base, timeout);
                warn!(
                    "Mesh attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, attempts, e, delay
                );
                audit(AuditEvent::MeshJoinFailed {
                    attempt,
                    error: e.to_string(),
                    retry_in_ms: Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
                });
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                audit(AuditEvent::MeshJoinFailed {
                    attempt,
                    error: e.to_string(),
                    retry_in_ms: None,
                });
                return Err(e);
            }
        }
    }
}

/// State bookkeeping shared by every stage.
struct Progress {
    state: BootstrapState,
    trail: Vec<BootstrapState>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: BootstrapState::Init,
            trail: vec![BootstrapState::Init],
        }
    }

    fn advance(&mut self, next: BootstrapState) {
        info!("Bootstrap {} -> {}", self.state, next);
        audit(AuditEvent::StateTransition {
            from: self.state.name(),
            to: next.name(),
        });
        self.state = next;
        self.trail.push(next);
    }

    fn abort(mut self, error: BootstrapError) -> Aborted {
        let stage = self.state;
        error!("Bootstrap aborted during {}: {}", stage, error);
        audit(AuditEvent::Aborted {
            stage: stage.name(),
            exit_code: error.exit_code(),
            error: error.to_string(),
        });
        self.trail.push(BootstrapState::Aborted);
        Aborted {
            stage,
            error,
            trail: self.trail,
        }
    }
}
