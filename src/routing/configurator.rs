//! Exit-node routing configurator.

use tracing::{debug, info, warn};

use super::backend::RuleBackend;
use super::error::{BackendError, ConfigError};
use super::rules::{IpFamily, NetfilterTable, RoutingRule, RoutingRuleSet};
use super::target::{ExitNodeTarget, PassthroughReason};
use crate::config::Settings;
use crate::mesh::MeshStatus;

/// Installs and removes the rules that send the application's egress
/// through the mesh exit node.
///
/// The application's packets are recognized by owner uid, marked, routed
/// by a policy rule into a table whose default route is the mesh
/// interface, and masqueraded on the way out. With the kill switch on,
/// anything the application sends elsewhere except loopback is rejected.
pub struct RoutingConfigurator<B: RuleBackend> {
    backend: B,
    uid: u32,
    fwmark: u32,
    table: u32,
    priority: u32,
    interface: String,
    ipv6: bool,
    kill_switch: bool,
}

impl<B: RuleBackend> RoutingConfigurator<B> {
    /// Create a configurator for the application identity in `settings`.
    pub fn new(backend: B, settings: &Settings) -> Self {
        Self {
            backend,
            uid: settings.identity.uid,
            fwmark: settings.routing.fwmark,
            table: settings.routing.table,
            priority: settings.routing.rule_priority,
            interface: settings.mesh.tun.clone(),
            ipv6: settings.routing.ipv6,
            kill_switch: settings.routing.kill_switch,
        }
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The rules for `target`, in install order. Deterministic.
    pub fn plan(&self, target: ExitNodeTarget) -> RoutingRuleSet {
        let mut rules = vec![RoutingRule::ExitNode { target }];

        let families: &[IpFamily] = if self.ipv6 {
            &[IpFamily::V4, IpFamily::V6]
        } else {
            &[IpFamily::V4]
        };
        for &family in families {
            self.plan_family(family, &mut rules);
        }

        RoutingRuleSet::new(target, rules)
    }

    fn plan_family(&self, family: IpFamily, rules: &mut Vec<RoutingRule>) {
        let uid = self.uid.to_string();
        let uid = uid.as_str();
        let mark = format!("{:#x}", self.fwmark);
        let mark = mark.as_str();
        let interface = self.interface.as_str();
        let netfilter = |table, chain, clauses: &[&str]| RoutingRule::Netfilter {
            family,
            table,
            chain,
            clauses: clauses.iter().map(|s| s.to_string()).collect(),
        };

        rules.push(RoutingRule::PolicyRule {
            family,
            fwmark: self.fwmark,
            table: self.table,
            priority: self.priority,
        });
        rules.push(RoutingRule::DefaultRoute {
            family,
            interface: self.interface.clone(),
            table: self.table,
        });
        rules.push(netfilter(
            NetfilterTable::Mangle,
            "OUTPUT",
            &["-m", "owner", "--uid-owner", uid, "-j", "MARK", "--set-mark", mark],
        ));
        rules.push(netfilter(
            NetfilterTable::Nat,
            "POSTROUTING",
            &["-o", interface, "-m", "mark", "--mark", mark, "-j", "MASQUERADE"],
        ));
        if self.kill_switch {
            rules.push(netfilter(
                NetfilterTable::Filter,
                "OUTPUT",
                &["-o", "lo", "-m", "owner", "--uid-owner", uid, "-j", "ACCEPT"],
            ));
            rules.push(netfilter(
                NetfilterTable::Filter,
                "OUTPUT",
                &["-m", "owner", "--uid-owner", uid, "!", "-o", interface, "-j", "REJECT"],
            ));
        }
    }

    /// Route the application's egress through `target`.
    ///
    /// The target must be an online peer offering itself as exit node.
    /// Rules already in place are left alone, so applying the same target
    /// twice installs nothing the second time. If any rule fails, every
    /// rule of the set that is in place is removed again in reverse order,
    /// including rules that were there before the call.
    ///
    /// A different exit node selected on the daemon beforehand is replaced
    /// and not restored by rollback or teardown.
    pub fn apply(
        &mut self,
        target: ExitNodeTarget,
        peers: &MeshStatus,
    ) -> Result<RoutingRuleSet, ConfigError> {
        let peer = peers
            .find_peer(target.addr())
            .ok_or(ConfigError::UnknownPeer { target })?;
        if !peer.online {
            return Err(ConfigError::PeerUnavailable {
                target,
                host_name: peer.host_name.clone(),
                reason: "peer is offline",
            });
        }
        if !peer.exit_node_option {
            return Err(ConfigError::PeerUnavailable {
                target,
                host_name: peer.host_name.clone(),
                reason: "peer does not advertise itself as exit node",
            });
        }

        if let Some(active) = peers.active_exit_node()
            && !active.addresses.contains(&target.addr())
        {
            warn!(
                "Replacing active exit node {} with {}; the previous selection is not restored",
                active.host_name, target
            );
        }

        let set = self.plan(target);
        let mut added = 0;

        for rule in set.rules() {
            let outcome = match self.backend.is_installed(rule) {
                Ok(true) => {
                    debug!("Already installed: {}", rule);
                    continue;
                }
                Ok(false) => self.backend.install(rule),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                return Err(self.rollback(rule, &set, e));
            }
            debug!("Installed: {}", rule);
            added += 1;
        }

        info!(
            "Exit node {} ({}) configured: {} rules, {} new",
            target,
            peer.host_name,
            set.len(),
            added
        );
        Ok(set)
    }

    /// Pass-through: no exit node configured, nothing to install.
    pub fn noop(&self, reason: PassthroughReason) -> RoutingRuleSet {
        info!("No exit-node routing: {}", reason);
        RoutingRuleSet::empty()
    }

    /// Remove the rules of `rules` in reverse order.
    ///
    /// Rules not in place are skipped, so tearing down twice is harmless.
    /// Every rule is attempted; the first failure is returned. Returns the
    /// number of rules removed.
    pub fn teardown(&mut self, rules: &RoutingRuleSet) -> Result<usize, ConfigError> {
        let mut removed = 0;
        let mut first_error = None;

        for rule in rules.rules().iter().rev() {
            let outcome = match self.backend.is_installed(rule) {
                Ok(false) => {
                    debug!("Not installed, skipping: {}", rule);
                    continue;
                }
                Ok(true) => self.backend.remove(rule),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    debug!("Removed: {}", rule);
                    removed += 1;
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", rule, e);
                    first_error.get_or_insert(ConfigError::RuleRemoveFailed {
                        rule: rule.to_string(),
                        source: e,
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Removed {} routing rules", removed);
                Ok(removed)
            }
        }
    }

    /// Remove every rule of `set` that is in place, newest first, so a
    /// failed apply leaves none of the set behind.
    fn rollback(
        &mut self,
        failed: &RoutingRule,
        set: &RoutingRuleSet,
        source: BackendError,
    ) -> ConfigError {
        warn!("Failed to install {}: {}; rolling back", failed, source);

        let mut rolled_back = 0;
        for rule in set.rules().iter().rev() {
            match self.backend.is_installed(rule) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => debug!("Cannot probe {} ({}), removing anyway", rule, e),
            }
            match self.backend.remove(rule) {
                Ok(()) => rolled_back += 1,
                Err(e) => warn!("Rollback of {} failed: {}", rule, e),
            }
        }

        ConfigError::RuleInstallFailed {
            rule: failed.to_string(),
            rolled_back,
            source,
        }
    }
}
