//! Routing rules and the commands that install them.
//!
//! Each [`RoutingRule`] knows three invocations: install, remove, and a
//! probe used to tell whether it is already in place. How a probe's
//! outcome is read depends on the rule kind and is up to the backend.

use std::fmt;

use super::target::ExitNodeTarget;

/// Address family a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

impl IpFamily {
    fn ip_flag(self) -> &'static str {
        match self {
            Self::V4 => "-4",
            Self::V6 => "-6",
        }
    }
}

/// Netfilter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetfilterTable {
    /// Packet marking.
    Mangle,
    /// Address translation.
    Nat,
    /// Accept/reject decisions.
    Filter,
}

impl NetfilterTable {
    fn as_str(self) -> &'static str {
        match self {
            Self::Mangle => "mangle",
            Self::Nat => "nat",
            Self::Filter => "filter",
        }
    }
}

/// The program an [`Invocation`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// The mesh control CLI.
    MeshCli,
    /// `ip`.
    Ip,
    /// `iptables` or `ip6tables`.
    Iptables(IpFamily),
}

impl Tool {
    fn default_name(self) -> &'static str {
        match self {
            Self::MeshCli => "tailscale",
            Self::Ip => "ip",
            Self::Iptables(IpFamily::V4) => "iptables",
            Self::Iptables(IpFamily::V6) => "ip6tables",
        }
    }
}

/// A command line, minus the resolved binary path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// What to run.
    pub tool: Tool,
    /// Its arguments.
    pub args: Vec<String>,
}

impl Invocation {
    fn new(tool: Tool, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tool,
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tool.default_name())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// One entry of the exit-node routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutingRule {
    /// Exit-node selection on the mesh daemon.
    ExitNode {
        /// The selected peer.
        target: ExitNodeTarget,
    },

    /// Policy rule sending marked packets to the dedicated table.
    PolicyRule {
        /// Address family.
        family: IpFamily,
        /// Firewall mark to match.
        fwmark: u32,
        /// Routing table to look up.
        table: u32,
        /// Rule priority.
        priority: u32,
    },

    /// Default route through the mesh interface in the dedicated table.
    DefaultRoute {
        /// Address family.
        family: IpFamily,
        /// Mesh tunnel interface.
        interface: String,
        /// Routing table.
        table: u32,
    },

    /// A netfilter rule appended to a chain.
    Netfilter {
        /// Address family.
        family: IpFamily,
        /// Netfilter table.
        table: NetfilterTable,
        /// Chain name.
        chain: &'static str,
        /// Match and target arguments.
        clauses: Vec<String>,
    },
}

impl RoutingRule {
    /// Address family, or `None` for daemon-wide rules.
    pub fn family(&self) -> Option<IpFamily> {
        match self {
            Self::ExitNode { .. } => None,
            Self::PolicyRule { family, .. }
            | Self::DefaultRoute { family, .. }
            | Self::Netfilter { family, .. } => Some(*family),
        }
    }

    /// Command that installs the rule.
    pub fn install(&self) -> Invocation {
        self.command("add", "replace", "-A")
    }

    /// Command that removes the rule.
    pub fn remove(&self) -> Invocation {
        match self {
            Self::ExitNode { .. } => Invocation::new(Tool::MeshCli, ["set", "--exit-node="]),
            _ => self.command("del", "del", "-D"),
        }
    }

    /// Command whose outcome tells whether the rule is in place.
    ///
    /// - `ExitNode`: JSON status; the target peer must be the active exit node.
    /// - `PolicyRule`, `DefaultRoute`: listing; non-empty output means present.
    /// - `Netfilter`: `-C`; success means present.
    pub fn probe(&self) -> Invocation {
        match self {
            Self::ExitNode { .. } => Invocation::new(Tool::MeshCli, ["status", "--json"]),
            Self::DefaultRoute {
                family,
                interface,
                table,
            } => Invocation::new(
                Tool::Ip,
                [
                    family.ip_flag().to_string(),
                    "route".to_string(),
                    "show".to_string(),
                    "table".to_string(),
                    table.to_string(),
                    "default".to_string(),
                    "dev".to_string(),
                    interface.clone(),
                ],
            ),
            _ => self.command("list", "show", "-C"),
        }
    }

    /// Build the command for this rule. The verbs only apply to the kind
    /// of rule they name; the exit node is always the selection command.
    fn command(&self, rule_verb: &str, route_verb: &str, chain_op: &str) -> Invocation {
        match self {
            Self::ExitNode { target } => Invocation::new(
                Tool::MeshCli,
                ["set".to_string(), format!("--exit-node={}", target)],
            ),
            Self::PolicyRule {
                family,
                fwmark,
                table,
                priority,
            } => Invocation::new(
                Tool::Ip,
                [
                    family.ip_flag().to_string(),
                    "rule".to_string(),
                    rule_verb.to_string(),
                    "fwmark".to_string(),
                    format!("{:#x}", fwmark),
                    "lookup".to_string(),
                    table.to_string(),
                    "priority".to_string(),
                    priority.to_string(),
                ],
            ),
            Self::DefaultRoute {
                family,
                interface,
                table,
            } => Invocation::new(
                Tool::Ip,
                [
                    family.ip_flag().to_string(),
                    "route".to_string(),
                    route_verb.to_string(),
                    "default".to_string(),
                    "dev".to_string(),
                    interface.clone(),
                    "table".to_string(),
                    table.to_string(),
                ],
            ),
            Self::Netfilter {
                family,
                table,
                chain,
                clauses,
            } => {
                let mut args = vec![
                    "-w".to_string(),
                    "-t".to_string(),
                    table.as_str().to_string(),
                    chain_op.to_string(),
                    chain.to_string(),
                ];
                args.extend(clauses.iter().cloned());
                Invocation {
                    tool: Tool::Iptables(*family),
                    args,
                }
            }
        }
    }
}

impl fmt::Display for RoutingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.install().fmt(f)
    }
}

/// The rules that make up exit-node routing for one target, in install
/// order. Empty for pass-through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingRuleSet {
    target: Option<ExitNodeTarget>,
    rules: Vec<RoutingRule>,
}

impl RoutingRuleSet {
    /// The pass-through set.
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn new(target: ExitNodeTarget, rules: Vec<RoutingRule>) -> Self {
        Self {
            target: Some(target),
            rules,
        }
    }

    /// The exit node, `None` for pass-through.
    pub fn target(&self) -> Option<ExitNodeTarget> {
        self.target
    }

    /// Rules in install order.
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether this is a pass-through set.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark_rule() -> RoutingRule {
        RoutingRule::Netfilter {
            family: IpFamily::V4,
            table: NetfilterTable::Mangle,
            chain: "OUTPUT",
            clauses: ["-m", "owner", "--uid-owner", "65532", "-j", "MARK", "--set-mark", "0x1000"]
                .map(String::from)
                .to_vec(),
        }
    }

    #[test]
    fn test_netfilter_commands() {
        let rule = mark_rule();
        assert_eq!(
            rule.to_string(),
            "iptables -w -t mangle -A OUTPUT -m owner --uid-owner 65532 -j MARK --set-mark 0x1000"
        );
        assert_eq!(rule.remove().args[3], "-D");
        assert_eq!(rule.probe().args[3], "-C");
    }

    #[test]
    fn test_policy_rule_commands() {
        let rule = RoutingRule::PolicyRule {
            family: IpFamily::V6,
            fwmark: 0x1000,
            table: 7070,
            priority: 5000,
        };
        assert_eq!(
            rule.to_string(),
            "ip -6 rule add fwmark 0x1000 lookup 7070 priority 5000"
        );
        assert_eq!(
            rule.remove().to_string(),
            "ip -6 rule del fwmark 0x1000 lookup 7070 priority 5000"
        );
        assert_eq!(rule.probe().args[2], "list");
    }

    #[test]
    fn test_default_route_commands() {
        let rule = RoutingRule::DefaultRoute {
            family: IpFamily::V4,
            interface: "tailscale0".to_string(),
            table: 7070,
        };
        assert_eq!(
            rule.to_string(),
            "ip -4 route replace default dev tailscale0 table 7070"
        );
        assert_eq!(
            rule.probe().to_string(),
            "ip -4 route show table 7070 default dev tailscale0"
        );
    }

    #[test]
    fn test_exit_node_commands() {
        let rule = RoutingRule::ExitNode {
            target: ExitNodeTarget::new("100.101.0.5".parse().unwrap()),
        };
        assert_eq!(rule.to_string(), "tailscale set --exit-node=100.101.0.5");
        assert_eq!(rule.remove().to_string(), "tailscale set --exit-node=");
        assert!(rule.family().is_none());
    }

    #[test]
    fn test_empty_set() {
        let set = RoutingRuleSet::empty();
        assert!(set.is_empty());
        assert!(set.target().is_none());
    }
}
