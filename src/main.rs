//! marmithon-bootstrap: container entrypoint for marmithon
//!
//! Runs as PID 1 of the container. Joins the mesh, configures exit-node
//! routing, drops root and execs the application in its own place.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: goes to syslog, never to the application's stdio
//! - **Debug logging**: stderr, until the exec replaces this process
//! - **Exit status**: every failure exits with a code from
//!   [`marmithon_bootstrap::exit_code`] before the application is started

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use marmithon_bootstrap::{
    cli::Cli,
    cli_handler,
    config::{BootstrapEnv, Settings, SettingsLoader},
    exit_code,
    orchestrator::{BootstrapError, Orchestrator},
    privilege::PrivilegeContext,
    telemetry,
};
use tracing::{debug, error, warn};

fn main() -> ExitCode {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("marmithon-bootstrap: {:#}", e);
        return ExitCode::from(exit_code::RUNTIME);
    }

    debug!("Parsed CLI arguments: {:?}", cli);

    init_audit();

    let (settings, env) = match load(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(exit_code::CONFIG);
        }
    };

    if let Some(command) = cli.command {
        return match cli_handler::handle_command(command, &settings, &env) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{}", e);
                ExitCode::from(e.exit_code())
            }
        };
    }

    let privilege = match PrivilegeContext::acquire() {
        Ok(privilege) => privilege,
        Err(e) => {
            let e = BootstrapError::from(e);
            error!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    // The orchestrator logs and audits its own abort.
    let handoff = match Orchestrator::system(settings, env, privilege)
        .with_app_args(cli.app_args)
        .run()
    {
        Ok(handoff) => handoff,
        Err(aborted) => return ExitCode::from(aborted.exit_code()),
    };

    match handoff.exec() {
        Ok(never) => match never {},
        Err(e) => {
            error!("{}", e);
            ExitCode::from(exit_code::EXEC_FAILED)
        }
    }
}

/// Load settings and read the environment once.
fn load(cli: &Cli) -> Result<(Settings, BootstrapEnv)> {
    let settings = SettingsLoader::new()
        .load(cli)
        .context("Failed to load settings")?;
    debug!("Loaded settings: {:?}", settings);

    let env = BootstrapEnv::from_process().context("Failed to read environment")?;
    Ok((settings, env))
}

/// Connect the audit trail to syslog.
///
/// Containers often run without a syslog socket, so a missing one only
/// downgrades auditing to the debug log.
fn init_audit() {
    if let Err(e) = telemetry::init_logger() {
        warn!("Syslog audit unavailable ({}), auditing to debug log only", e);
        if let Err(e) = telemetry::init_null_logger() {
            warn!("Failed to initialize null audit logger: {}", e);
        }
    }
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, or info when unset
/// - 1 (-v): Debug level
/// - 2+ (-vv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
