//! marmithon-bootstrap: container entrypoint for marmithon
//!
//! Starts as root, joins the mesh VPN, optionally routes the application's
//! egress through a mesh exit node, drops root for good and execs the
//! application in its place.
//!
//! # Security Model
//!
//! The bootstrap is **fail-closed**: any failure aborts before the
//! application starts, with an exit code naming the cause, and routing is
//! never left half-installed. The privilege drop is one-way and verified;
//! the exec requires proof that it happened.
//!
//! # Architecture
//!
//! - **Mesh**: supervises the mesh daemon until the tunnel is up
//! - **Routing**: policy routing and netfilter rules toward the exit node
//! - **Privilege**: root → unprivileged identity, then exec
//! - **Orchestrator**: the state machine tying them together
//! - **Config**: TOML settings and the process environment
//! - **Telemetry**: structured syslog audit trail

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod backoff;
pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod exit_code;
pub mod mesh;
pub mod orchestrator;
pub mod privilege;
pub mod routing;
pub mod telemetry;
