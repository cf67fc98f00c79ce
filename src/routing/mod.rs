//! Exit-node routing for the application's egress.
//!
//! When `EXIT_NODE_IP` names a mesh peer, every packet the unprivileged
//! application sends leaves through the mesh tunnel toward that peer:
//!
//! ```text
//!  app (uid 65532)
//!     │  mangle OUTPUT: --uid-owner → MARK 0x1000
//!     ▼
//!  ip rule fwmark 0x1000 → table 7070 ──► default dev tailscale0
//!     │  nat POSTROUTING: MASQUERADE on tailscale0
//!     ▼
//!  tailscaled ──► exit node (tailscale set --exit-node)
//! ```
//!
//! With the kill switch on, anything else the application sends, loopback
//! aside, is rejected. Without an exit node the configurator passes traffic
//! through untouched.

mod backend;
mod configurator;
mod error;
mod rules;
mod target;

pub use backend::{CommandBackend, MemoryBackend, RuleBackend};
pub use configurator::RoutingConfigurator;
pub use error::{BackendError, ConfigError};
pub use rules::{Invocation, IpFamily, NetfilterTable, RoutingRule, RoutingRuleSet, Tool};
pub use target::{ExitNodeSetting, ExitNodeTarget, PassthroughReason};
