//! Settings schema.
//!
//! Every section is optional in the file; missing keys take the defaults
//! below, which match the container image (Tailscale under `/var/lib`,
//! application under `/app`, `nonroot` user 65532).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::error::LoadError;
use crate::privilege::IdentityDescriptor;

/// Top-level settings structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Mesh daemon supervision.
    pub mesh: MeshSettings,
    /// Exit-node routing.
    pub routing: RoutingSettings,
    /// Identity the application runs under.
    pub identity: IdentityDescriptor,
    /// The application handed control at the end.
    pub app: AppSettings,
}

impl Settings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.mesh.join_attempts == 0 {
            return Err(invalid("mesh.join_attempts", "must be at least 1"));
        }
        if self.mesh.poll_interval_ms == 0 || self.mesh.poll_interval_ms >= 1000 {
            return Err(invalid(
                "mesh.poll_interval_ms",
                "must be between 1 and 999 milliseconds",
            ));
        }
        if self.mesh.ready_timeout_secs == 0 {
            return Err(invalid("mesh.ready_timeout_secs", "must be non-zero"));
        }
        if self.mesh.tun == "userspace-networking" {
            return Err(invalid(
                "mesh.tun",
                "userspace networking has no interface to route through",
            ));
        }
        if self.mesh.tun.is_empty() || self.mesh.tun.len() > 15 {
            return Err(invalid("mesh.tun", "interface names are 1 to 15 characters"));
        }
        if self.routing.fwmark == 0 {
            return Err(invalid("routing.fwmark", "must be non-zero"));
        }
        if self.routing.fwmark & TAILSCALE_FWMARK_MASK != 0 {
            return Err(invalid(
                "routing.fwmark",
                "overlaps the bits reserved by the mesh daemon (0xff0000)",
            ));
        }
        if self.identity.uid == 0 || self.identity.gid == 0 {
            return Err(invalid("identity", "uid and gid must be non-root"));
        }
        if !self.app.binary.is_absolute() {
            return Err(invalid("app.binary", "must be an absolute path"));
        }
        if !self.app.work_dir.is_absolute() {
            return Err(invalid("app.work_dir", "must be an absolute path"));
        }
        Ok(())
    }
}

/// Firewall mark bits used by tailscaled itself.
const TAILSCALE_FWMARK_MASK: u32 = 0x00ff_0000;

fn invalid(field: &str, message: &str) -> LoadError {
    LoadError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Mesh daemon settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MeshSettings {
    /// Spawn the daemon ourselves. `false` when it runs as a sidecar.
    pub manage_daemon: bool,
    /// Daemon executable.
    pub daemon_binary: PathBuf,
    /// Extra daemon arguments.
    pub daemon_args: Vec<String>,
    /// Control CLI executable.
    pub cli_binary: PathBuf,
    /// Daemon control socket.
    pub socket: PathBuf,
    /// Daemon state directory.
    pub state_dir: PathBuf,
    /// Tunnel interface name.
    pub tun: String,
    /// Hostname to register on the mesh.
    pub hostname: Option<String>,
    /// Extra arguments for the authenticated join.
    pub up_args: Vec<String>,
    /// How long to wait for the control socket after spawning the daemon.
    pub daemon_start_timeout_secs: u64,
    /// Deadline for one readiness wait.
    pub ready_timeout_secs: u64,
    /// Status poll cadence.
    pub poll_interval_ms: u64,
    /// Mesh establishment attempts before aborting.
    pub join_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base_ms: u64,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            manage_daemon: true,
            daemon_binary: PathBuf::from("tailscaled"),
            daemon_args: Vec::new(),
            cli_binary: PathBuf::from("tailscale"),
            socket: PathBuf::from("/var/run/tailscale/tailscaled.sock"),
            state_dir: PathBuf::from("/var/lib/tailscale"),
            tun: "tailscale0".to_string(),
            hostname: None,
            up_args: Vec::new(),
            daemon_start_timeout_secs: 10,
            ready_timeout_secs: 30,
            poll_interval_ms: 250,
            join_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl MeshSettings {
    /// Readiness deadline.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Status poll cadence.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Control socket deadline after spawning the daemon.
    pub fn daemon_start_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon_start_timeout_secs)
    }
}

/// Exit-node routing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Routing table holding the mesh default route.
    pub table: u32,
    /// Firewall mark put on application packets.
    pub fwmark: u32,
    /// Priority of the policy rule; lower than the daemon's own rules.
    pub rule_priority: u32,
    /// Also install IPv6 rules.
    pub ipv6: bool,
    /// Reject application egress that would bypass the tunnel.
    pub kill_switch: bool,
    /// `ip` executable.
    pub ip_binary: PathBuf,
    /// `iptables` executable.
    pub iptables_binary: PathBuf,
    /// `ip6tables` executable.
    pub ip6tables_binary: PathBuf,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            table: 7070,
            fwmark: 0x1000,
            rule_priority: 5000,
            ipv6: true,
            kill_switch: true,
            ip_binary: PathBuf::from("ip"),
            iptables_binary: PathBuf::from("iptables"),
            ip6tables_binary: PathBuf::from("ip6tables"),
        }
    }
}

/// The application started after the privilege drop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppSettings {
    /// Absolute path of the application.
    pub binary: PathBuf,
    /// Default arguments (replaced by trailing CLI arguments).
    pub args: Vec<String>,
    /// Working directory.
    pub work_dir: PathBuf,
    /// Variables removed from the inherited environment.
    pub scrub_env: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/app/marmithon"),
            args: Vec::new(),
            work_dir: PathBuf::from("/app"),
            scrub_env: vec!["TS_AUTHKEY".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.mesh.tun, "tailscale0");
        assert_eq!(settings.identity.uid, 65532);
        assert_eq!(settings.mesh.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [mesh]
            ready_timeout_secs = 60

            [app]
            args = ["-config", "marmithon.toml"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.mesh.ready_timeout_secs, 60);
        assert_eq!(settings.mesh.join_attempts, 3);
        assert_eq!(settings.app.binary, PathBuf::from("/app/marmithon"));
        assert_eq!(settings.app.args, vec!["-config", "marmithon.toml"]);
        assert_eq!(settings.identity.home, PathBuf::from("/app"));
    }

    #[test]
    fn test_poll_interval_must_be_sub_second() {
        let mut settings = Settings::default();
        settings.mesh.poll_interval_ms = 1000;
        assert!(matches!(
            settings.validate(),
            Err(LoadError::InvalidValue { ref field, .. }) if field == "mesh.poll_interval_ms"
        ));
    }

    #[test]
    fn test_fwmark_must_not_collide_with_daemon() {
        let mut settings = Settings::default();
        settings.routing.fwmark = 0x80000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_root_identity_rejected() {
        let mut settings = Settings::default();
        settings.identity.uid = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_relative_binary_rejected() {
        let mut settings = Settings::default();
        settings.app.binary = PathBuf::from("marmithon");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_userspace_networking_rejected() {
        let mut settings = Settings::default();
        settings.mesh.tun = "userspace-networking".to_string();
        assert!(settings.validate().is_err());
    }
}
