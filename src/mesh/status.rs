//! Parsing of the daemon's `status --json` output.
//!
//! Only the fields the bootstrap needs are modeled. The daemon omits or
//! nulls several of them (`Peer` with no peers, `TailscaleIPs` before the
//! node is registered), so all of them default.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// Connection state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshConnectionState {
    /// Daemon not running, not reachable, or stopped.
    Down,
    /// Waiting for the join to be accepted.
    Authenticating,
    /// Authenticated, bringing the tunnel up.
    Connecting,
    /// Tunnel usable.
    Up,
    /// Terminal failure for this attempt.
    Failed,
}

impl fmt::Display for MeshConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Down => "down",
            Self::Authenticating => "authenticating",
            Self::Connecting => "connecting",
            Self::Up => "up",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The daemon's own backend state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendState {
    /// Daemon has not loaded its state yet.
    NoState,
    /// Node is not logged in.
    NeedsLogin,
    /// Logged in, awaiting admin approval.
    NeedsMachineAuth,
    /// Logged in but turned off.
    Stopped,
    /// Connecting to the mesh.
    Starting,
    /// Connected.
    Running,
    /// Anything this version does not know.
    Unknown(String),
}

impl From<&str> for BackendState {
    fn from(value: &str) -> Self {
        match value {
            "NoState" => Self::NoState,
            "NeedsLogin" => Self::NeedsLogin,
            "NeedsMachineAuth" => Self::NeedsMachineAuth,
            "Stopped" => Self::Stopped,
            "Starting" => Self::Starting,
            "Running" => Self::Running,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A peer on the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPeer {
    /// Peer host name.
    pub host_name: String,
    /// Fully qualified mesh DNS name.
    pub dns_name: String,
    /// Mesh addresses assigned to the peer.
    pub addresses: Vec<IpAddr>,
    /// Whether the coordination server sees the peer online.
    pub online: bool,
    /// Whether the peer offers itself as an exit node.
    pub exit_node_option: bool,
    /// Whether this node currently uses the peer as exit node.
    pub active_exit_node: bool,
}

/// Snapshot of the daemon status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshStatus {
    /// Backend state.
    pub backend_state: BackendState,
    /// This node's mesh addresses.
    pub self_addresses: Vec<IpAddr>,
    /// Known peers, sorted by host name.
    pub peers: Vec<MeshPeer>,
    /// Health warnings reported by the daemon.
    pub health: Vec<String>,
    /// Interactive login URL, when the daemon wants one.
    pub auth_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawStatus {
    #[serde(default)]
    backend_state: String,
    #[serde(default, rename = "AuthURL")]
    auth_url: String,
    #[serde(default, rename = "Self")]
    self_node: Option<RawPeer>,
    #[serde(default)]
    peer: Option<HashMap<String, RawPeer>>,
    #[serde(default)]
    health: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawPeer {
    host_name: String,
    #[serde(rename = "DNSName")]
    dns_name: String,
    #[serde(rename = "TailscaleIPs")]
    tailscale_ips: Option<Vec<IpAddr>>,
    online: bool,
    exit_node_option: bool,
    exit_node: bool,
}

impl From<RawPeer> for MeshPeer {
    fn from(raw: RawPeer) -> Self {
        Self {
            host_name: raw.host_name,
            dns_name: raw.dns_name,
            addresses: raw.tailscale_ips.unwrap_or_default(),
            online: raw.online,
            exit_node_option: raw.exit_node_option,
            active_exit_node: raw.exit_node,
        }
    }
}

impl MeshStatus {
    /// Parse `status --json` output.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let raw: RawStatus = serde_json::from_str(json)?;

        let mut peers: Vec<MeshPeer> = raw
            .peer
            .unwrap_or_default()
            .into_values()
            .map(MeshPeer::from)
            .collect();
        peers.sort_by(|a, b| a.host_name.cmp(&b.host_name));

        Ok(Self {
            backend_state: BackendState::from(raw.backend_state.as_str()),
            self_addresses: raw
                .self_node
                .and_then(|node| node.tailscale_ips)
                .unwrap_or_default(),
            peers,
            health: raw.health.unwrap_or_default(),
            auth_url: Some(raw.auth_url).filter(|url| !url.is_empty()),
        })
    }

    /// Map the backend state onto the supervisor's state machine.
    ///
    /// `NeedsLogin` while no credential was supplied means the node was
    /// expected to be pre-authorized and is not: that is a failure, not a
    /// wait.
    pub fn connection_state(&self, credential_supplied: bool) -> MeshConnectionState {
        match self.backend_state {
            BackendState::Running => MeshConnectionState::Up,
            BackendState::Starting => MeshConnectionState::Connecting,
            BackendState::NeedsMachineAuth => MeshConnectionState::Authenticating,
            BackendState::NeedsLogin if credential_supplied => MeshConnectionState::Authenticating,
            BackendState::NeedsLogin => MeshConnectionState::Failed,
            BackendState::NoState | BackendState::Stopped | BackendState::Unknown(_) => {
                MeshConnectionState::Down
            }
        }
    }

    /// Find the peer owning `addr`.
    pub fn find_peer(&self, addr: IpAddr) -> Option<&MeshPeer> {
        self.peers.iter().find(|peer| peer.addresses.contains(&addr))
    }

    /// The peer currently used as exit node, if any.
    pub fn active_exit_node(&self) -> Option<&MeshPeer> {
        self.peers.iter().find(|peer| peer.active_exit_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const RUNNING: &str = r#"{
        "Version": "1.76.6",
        "BackendState": "Running",
        "AuthURL": "",
        "TailscaleIPs": ["100.88.1.2", "fd7a:115c:a1e0::1"],
        "Self": {
            "HostName": "marmithon",
            "DNSName": "marmithon.tailnet.ts.net.",
            "TailscaleIPs": ["100.88.1.2", "fd7a:115c:a1e0::1"],
            "Online": true
        },
        "Health": null,
        "Peer": {
            "nodekey:aaa": {
                "HostName": "vps-paris",
                "DNSName": "vps-paris.tailnet.ts.net.",
                "TailscaleIPs": ["100.101.0.5", "fd7a:115c:a1e0::5"],
                "Online": true,
                "ExitNodeOption": true,
                "ExitNode": false
            },
            "nodekey:bbb": {
                "HostName": "laptop",
                "DNSName": "laptop.tailnet.ts.net.",
                "TailscaleIPs": ["100.101.0.9"],
                "Online": false,
                "ExitNodeOption": false
            }
        }
    }"#;

    #[test]
    fn test_parse_running_status() {
        let status = MeshStatus::parse(RUNNING).unwrap();

        assert_eq!(status.backend_state, BackendState::Running);
        assert_eq!(status.connection_state(false), MeshConnectionState::Up);
        assert_eq!(status.self_addresses.len(), 2);
        assert_eq!(status.peers.len(), 2);
        assert_eq!(status.peers[0].host_name, "laptop");
        assert!(status.auth_url.is_none());
        assert!(status.health.is_empty());
    }

    #[test]
    fn test_find_peer_by_any_address() {
        let status = MeshStatus::parse(RUNNING).unwrap();

        let peer = status
            .find_peer(IpAddr::V4(Ipv4Addr::new(100, 101, 0, 5)))
            .unwrap();
        assert_eq!(peer.host_name, "vps-paris");
        assert!(peer.exit_node_option);

        let v6 = status.find_peer("fd7a:115c:a1e0::5".parse().unwrap()).unwrap();
        assert_eq!(v6.host_name, "vps-paris");

        assert!(status.find_peer(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))).is_none());
        assert!(status.active_exit_node().is_none());
    }

    #[test]
    fn test_parse_starting_without_peers() {
        let status = MeshStatus::parse(
            r#"{"BackendState": "Starting", "Self": {"TailscaleIPs": null}, "Peer": null}"#,
        )
        .unwrap();

        assert_eq!(status.connection_state(true), MeshConnectionState::Connecting);
        assert!(status.peers.is_empty());
        assert!(status.self_addresses.is_empty());
    }

    #[test]
    fn test_needs_login_depends_on_credential() {
        let status = MeshStatus::parse(
            r#"{"BackendState": "NeedsLogin", "AuthURL": "https://login.tailscale.com/a/xyz"}"#,
        )
        .unwrap();

        assert_eq!(status.connection_state(true), MeshConnectionState::Authenticating);
        assert_eq!(status.connection_state(false), MeshConnectionState::Failed);
        assert_eq!(
            status.auth_url.as_deref(),
            Some("https://login.tailscale.com/a/xyz")
        );
    }

    #[test]
    fn test_unknown_backend_state_is_down() {
        let status = MeshStatus::parse(r#"{"BackendState": "Quantum"}"#).unwrap();
        assert_eq!(
            status.backend_state,
            BackendState::Unknown("Quantum".to_string())
        );
        assert_eq!(status.connection_state(true), MeshConnectionState::Down);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(MeshStatus::parse("failed to connect to local tailscaled").is_err());
    }
}
