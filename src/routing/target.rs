//! The exit node the application's egress is routed through.

use serde::Serialize;
use std::fmt;
use std::net::{AddrParseError, IpAddr};

/// Address of the mesh peer acting as exit node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExitNodeTarget(IpAddr);

impl ExitNodeTarget {
    /// Wrap a peer address.
    pub fn new(addr: IpAddr) -> Self {
        Self(addr)
    }

    /// The peer address.
    pub fn addr(&self) -> IpAddr {
        self.0
    }
}

impl fmt::Display for ExitNodeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How the exit node was configured.
///
/// Unset and empty both mean "no redirection" but are kept apart so that a
/// blank `EXIT_NODE_IP=` in a deployment manifest shows up in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitNodeSetting {
    /// The variable was not present at all.
    Unset,
    /// The variable was present but blank.
    Empty,
    /// Route through this peer.
    Target(ExitNodeTarget),
}

impl ExitNodeSetting {
    /// Interpret a raw environment value.
    pub fn parse(raw: Option<&str>) -> Result<Self, AddrParseError> {
        match raw.map(str::trim) {
            None => Ok(Self::Unset),
            Some("") => Ok(Self::Empty),
            Some(value) => value.parse().map(|addr| Self::Target(ExitNodeTarget(addr))),
        }
    }

    /// The target, when one is configured.
    pub fn target(&self) -> Option<ExitNodeTarget> {
        match self {
            Self::Target(target) => Some(*target),
            Self::Unset | Self::Empty => None,
        }
    }

    /// Why no routing is needed, or `None` when a target is configured.
    pub fn passthrough_reason(&self) -> Option<PassthroughReason> {
        match self {
            Self::Unset => Some(PassthroughReason::Unset),
            Self::Empty => Some(PassthroughReason::Empty),
            Self::Target(_) => None,
        }
    }
}

/// Why the routing configurator passed traffic through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassthroughReason {
    /// `EXIT_NODE_IP` absent.
    Unset,
    /// `EXIT_NODE_IP` present but blank.
    Empty,
}

impl fmt::Display for PassthroughReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("exit node unset"),
            Self::Empty => f.write_str("exit node empty"),
        }
    }
}
