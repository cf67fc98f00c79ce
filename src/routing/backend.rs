//! Executing routing rules.
//!
//! [`CommandBackend`] drives the real `ip`, `iptables`, `ip6tables` and
//! mesh CLI binaries. [`MemoryBackend`] keeps an in-memory table instead and
//! can be told to refuse specific rules.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use super::error::BackendError;
use super::rules::{Invocation, IpFamily, RoutingRule, Tool};
use crate::config::Settings;
use crate::mesh::MeshStatus;

/// Something that can install, remove and detect routing rules.
pub trait RuleBackend {
    /// Whether `rule` is currently in place.
    fn is_installed(&mut self, rule: &RoutingRule) -> Result<bool, BackendError>;

    /// Install `rule`. Does not check whether it already exists.
    fn install(&mut self, rule: &RoutingRule) -> Result<(), BackendError>;

    /// Remove `rule`.
    fn remove(&mut self, rule: &RoutingRule) -> Result<(), BackendError>;
}

/// Backend running the system networking tools.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    ip: PathBuf,
    iptables: PathBuf,
    ip6tables: PathBuf,
    mesh_cli: PathBuf,
    socket: PathBuf,
}

impl CommandBackend {
    /// Create a backend using the binaries named in `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            ip: settings.routing.ip_binary.clone(),
            iptables: settings.routing.iptables_binary.clone(),
            ip6tables: settings.routing.ip6tables_binary.clone(),
            mesh_cli: settings.mesh.cli_binary.clone(),
            socket: settings.mesh.socket.clone(),
        }
    }

    fn program(&self, tool: Tool) -> &Path {
        match tool {
            Tool::MeshCli => &self.mesh_cli,
            Tool::Ip => &self.ip,
            Tool::Iptables(IpFamily::V4) => &self.iptables,
            Tool::Iptables(IpFamily::V6) => &self.ip6tables,
        }
    }

    fn args(&self, invocation: &Invocation) -> Vec<String> {
        let mut args = Vec::with_capacity(invocation.args.len() + 1);
        if invocation.tool == Tool::MeshCli {
            args.push(format!("--socket={}", self.socket.display()));
        }
        args.extend(invocation.args.iter().cloned());
        args
    }

    /// Run a command and hand back its output whatever the exit status.
    fn output(&self, invocation: &Invocation) -> Result<(String, Output), BackendError> {
        let program = self.program(invocation.tool);
        let args = self.args(invocation);
        let cmd_str = format!("{} {}", program.display(), args.join(" "));
        debug!("Running: {}", cmd_str);

        let output = Command::new(program)
            .args(&args)
            .output()
            .map_err(|e| BackendError::CommandFailed {
                cmd: cmd_str.clone(),
                source: e,
            })?;
        Ok((cmd_str, output))
    }

    /// Run a command that must succeed.
    fn run(&self, invocation: &Invocation) -> Result<(), BackendError> {
        let (cmd, output) = self.output(invocation)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BackendError::CommandError { cmd, stderr });
        }
        Ok(())
    }
}

impl RuleBackend for CommandBackend {
    fn is_installed(&mut self, rule: &RoutingRule) -> Result<bool, BackendError> {
        let (cmd, output) = self.output(&rule.probe())?;

        match rule {
            RoutingRule::ExitNode { target } => {
                if !output.status.success() {
                    return Ok(false);
                }
                let status = MeshStatus::parse(&String::from_utf8_lossy(&output.stdout))
                    .map_err(|e| BackendError::CommandError {
                        cmd,
                        stderr: format!("unparseable status: {}", e),
                    })?;
                Ok(status
                    .find_peer(target.addr())
                    .is_some_and(|peer| peer.active_exit_node))
            }
            RoutingRule::PolicyRule { .. } | RoutingRule::DefaultRoute { .. } => {
                // A missing table makes the listing fail; that rule is absent too.
                Ok(output.status.success() && !output.stdout.trim_ascii().is_empty())
            }
            RoutingRule::Netfilter { .. } => Ok(output.status.success()),
        }
    }

    fn install(&mut self, rule: &RoutingRule) -> Result<(), BackendError> {
        self.run(&rule.install())
    }

    fn remove(&mut self, rule: &RoutingRule) -> Result<(), BackendError> {
        self.run(&rule.remove())
    }
}

/// In-memory rule table.
///
/// Like the real tools it does not deduplicate: installing a rule twice
/// stores it twice.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    installed: Vec<RoutingRule>,
    refuse_install: Vec<RoutingRule>,
    refuse_remove: Vec<RoutingRule>,
    operations: Vec<String>,
}

impl MemoryBackend {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make installing `rule` fail.
    #[must_use]
    pub fn refuse_install(mut self, rule: RoutingRule) -> Self {
        self.refuse_install.push(rule);
        self
    }

    /// Make removing `rule` fail.
    #[must_use]
    pub fn refuse_remove(mut self, rule: RoutingRule) -> Self {
        self.refuse_remove.push(rule);
        self
    }

    /// Rules currently in the table, in install order.
    pub fn installed(&self) -> &[RoutingRule] {
        &self.installed
    }

    /// Every install and remove performed, as command lines.
    pub fn operations(&self) -> &[String] {
        &self.operations
    }
}

impl RuleBackend for MemoryBackend {
    fn is_installed(&mut self, rule: &RoutingRule) -> Result<bool, BackendError> {
        Ok(self.installed.contains(rule))
    }

    fn install(&mut self, rule: &RoutingRule) -> Result<(), BackendError> {
        if self.refuse_install.contains(rule) {
            return Err(BackendError::Refused {
                rule: rule.to_string(),
            });
        }
        self.operations.push(rule.install().to_string());
        self.installed.push(rule.clone());
        Ok(())
    }

    fn remove(&mut self, rule: &RoutingRule) -> Result<(), BackendError> {
        if self.refuse_remove.contains(rule) {
            return Err(BackendError::Refused {
                rule: rule.to_string(),
            });
        }
        let Some(index) = self.installed.iter().position(|r| r == rule) else {
            return Err(BackendError::CommandError {
                cmd: rule.remove().to_string(),
                stderr: "No such rule".to_string(),
            });
        };
        self.operations.push(rule.remove().to_string());
        self.installed.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::rules::NetfilterTable;

    fn rule(mark: &str) -> RoutingRule {
        RoutingRule::Netfilter {
            family: IpFamily::V4,
            table: NetfilterTable::Mangle,
            chain: "OUTPUT",
            clauses: vec!["-j".to_string(), "MARK".to_string(), "--set-mark".to_string(), mark.to_string()],
        }
    }

    #[test]
    fn test_memory_backend_tracks_rules() {
        let mut backend = MemoryBackend::new();
        let a = rule("0x1");

        assert!(!backend.is_installed(&a).unwrap());
        backend.install(&a).unwrap();
        assert!(backend.is_installed(&a).unwrap());
        backend.remove(&a).unwrap();
        assert!(backend.installed().is_empty());
        assert_eq!(backend.operations().len(), 2);
    }

    #[test]
    fn test_memory_backend_refusals() {
        let a = rule("0x1");
        let b = rule("0x2");
        let mut backend = MemoryBackend::new()
            .refuse_install(a.clone())
            .refuse_remove(b.clone());

        assert!(matches!(backend.install(&a), Err(BackendError::Refused { .. })));
        backend.install(&b).unwrap();
        assert!(backend.remove(&b).is_err());
        assert_eq!(backend.installed(), &[b]);
    }

    #[test]
    fn test_memory_backend_remove_missing_fails() {
        let mut backend = MemoryBackend::new();
        assert!(matches!(
            backend.remove(&rule("0x1")),
            Err(BackendError::CommandError { .. })
        ));
    }

    #[test]
    fn test_command_backend_prefixes_socket() {
        let backend = CommandBackend::new(&Settings::default());
        let exit = RoutingRule::ExitNode {
            target: crate::routing::ExitNodeTarget::new("100.64.0.1".parse().unwrap()),
        };

        let args = backend.args(&exit.install());
        assert_eq!(args[0], "--socket=/var/run/tailscale/tailscaled.sock");
        assert_eq!(args[1], "set");

        let args = backend.args(&rule("0x1").install());
        assert_eq!(args[0], "-w");
    }

    #[test]
    fn test_command_backend_missing_binary() {
        let mut settings = Settings::default();
        settings.routing.iptables_binary = PathBuf::from("/nonexistent/iptables");
        let mut backend = CommandBackend::new(&settings);

        assert!(matches!(
            backend.is_installed(&rule("0x1")),
            Err(BackendError::CommandFailed { .. })
        ));
    }

    #[test]
    #[ignore = "requires CAP_NET_ADMIN"]
    fn test_command_backend_netfilter_round_trip() {
        let mut backend = CommandBackend::new(&Settings::default());
        let r = rule("0x7");

        backend.install(&r).unwrap();
        assert!(backend.is_installed(&r).unwrap());
        backend.remove(&r).unwrap();
        assert!(!backend.is_installed(&r).unwrap());
    }
}
