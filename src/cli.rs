//! Command-line interface definitions for marmithon-bootstrap.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// Container entrypoint for marmithon.
///
/// Joins the mesh VPN, optionally routes the application's egress through a
/// mesh exit node, drops root for good and execs the application. Reads
/// `TS_AUTHKEY` and `EXIT_NODE_IP` from the environment.
#[derive(Parser, Debug)]
#[command(name = "marmithon-bootstrap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to bootstrap and exec the application).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Arguments for the application, replacing `app.args` from settings.
    ///
    /// Put them after `--` so they are not taken for bootstrap options.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub app_args: Vec<String>,

    /// Settings file to use instead of /etc/marmithon/bootstrap.toml.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for the mesh to come up, per attempt.
    #[arg(long = "ready-timeout", value_name = "SECS")]
    pub ready_timeout: Option<u64>,

    /// Mesh establishment attempts before giving up.
    #[arg(long = "join-attempts", value_name = "N")]
    pub join_attempts: Option<u32>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = debug level
    /// -vv   = trace level
    ///
    /// Without it `RUST_LOG` applies, defaulting to info.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for marmithon-bootstrap.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the routing rules that would be installed, touching nothing.
    Plan {
        /// Exit node to plan for instead of `EXIT_NODE_IP`.
        #[arg(long = "exit-node", value_name = "IP")]
        exit_node: Option<IpAddr>,
    },

    /// Remove the routing rules installed for an exit node.
    ///
    /// Rules that are not in place are skipped, so running it twice is safe.
    Teardown {
        /// Exit node to tear down instead of `EXIT_NODE_IP`.
        #[arg(long = "exit-node", value_name = "IP")]
        exit_node: Option<IpAddr>,
    },
}
