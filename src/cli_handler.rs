//! Handling of the maintenance subcommands.
//!
//! `plan` and `teardown` work on the same rule set the bootstrap installs,
//! for the exit node given on the command line or in `EXIT_NODE_IP`.

use std::net::IpAddr;

use tracing::info;

use crate::cli::Commands;
use crate::config::{BootstrapEnv, Settings};
use crate::orchestrator::BootstrapError;
use crate::routing::{CommandBackend, ExitNodeTarget, MemoryBackend, RoutingConfigurator};
use crate::telemetry::{AuditEvent, audit};

/// Handle a subcommand.
pub fn handle_command(
    command: Commands,
    settings: &Settings,
    env: &BootstrapEnv,
) -> Result<(), BootstrapError> {
    match command {
        Commands::Plan { exit_node } => {
            plan(settings, env, exit_node);
            Ok(())
        }
        Commands::Teardown { exit_node } => teardown(settings, env, exit_node),
    }
}

fn resolve_target(env: &BootstrapEnv, exit_node: Option<IpAddr>) -> Option<ExitNodeTarget> {
    exit_node
        .map(ExitNodeTarget::new)
        .or_else(|| env.exit_node.target())
}

/// Print the rule set for the target without touching the system.
fn plan(settings: &Settings, env: &BootstrapEnv, exit_node: Option<IpAddr>) {
    let Some(target) = resolve_target(env, exit_node) else {
        let reason = env
            .exit_node
            .passthrough_reason()
            .map(|reason| reason.to_string())
            .unwrap_or_default();
        println!("No exit node configured ({}): traffic passes through untouched.", reason);
        return;
    };

    let configurator = RoutingConfigurator::new(MemoryBackend::new(), settings);
    let rules = configurator.plan(target);
    println!("# {} rules for exit node {}", rules.len(), target);
    for rule in rules.rules() {
        println!("{}", rule);
    }
}

/// Remove the rule set for the target from the running system.
fn teardown(
    settings: &Settings,
    env: &BootstrapEnv,
    exit_node: Option<IpAddr>,
) -> Result<(), BootstrapError> {
    let Some(target) = resolve_target(env, exit_node) else {
        info!("No exit node configured, nothing to tear down");
        return Ok(());
    };

    let mut configurator = RoutingConfigurator::new(CommandBackend::new(settings), settings);
    let rules = configurator.plan(target);
    let removed = configurator.teardown(&rules)?;
    audit(AuditEvent::RoutingTornDown { removed });
    println!("Removed {} of {} rules for exit node {}", removed, rules.len(), target);
    Ok(())
}
