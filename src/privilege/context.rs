//! One-way transition from root to the application identity.

use tracing::{debug, info};

use super::error::PrivilegeError;
use super::identity::{IdentityDescriptor, IdentitySwitch, SystemIdentity};

/// Proof that the process is still root.
///
/// `drop_to` consumes the context, so no code path can drop twice or reach a
/// privileged-only API afterwards.
#[derive(Debug)]
pub struct PrivilegeContext<S: IdentitySwitch = SystemIdentity> {
    switch: S,
}

/// Proof that the process now runs as the unprivileged identity.
///
/// Only [`PrivilegeContext::drop_to`] creates one. It is the capability
/// required to exec the application.
#[derive(Debug)]
pub struct Unprivileged {
    identity: IdentityDescriptor,
}

impl PrivilegeContext<SystemIdentity> {
    /// Capture the privileged context of the current process.
    pub fn acquire() -> Result<Self, PrivilegeError> {
        Self::with_switch(SystemIdentity)
    }
}

impl<S: IdentitySwitch> PrivilegeContext<S> {
    /// Capture the privileged context through a specific switch.
    ///
    /// Fails with [`PrivilegeError::NotPrivileged`] unless the effective uid is 0.
    pub fn with_switch(switch: S) -> Result<Self, PrivilegeError> {
        let euid = switch.effective_uid();
        if euid != 0 {
            return Err(PrivilegeError::NotPrivileged { euid });
        }
        Ok(Self { switch })
    }

    /// Irreversibly switch the process to `identity`.
    ///
    /// Groups are set before the uid, since changing them needs root.
    pub fn drop_to(self, identity: &IdentityDescriptor) -> Result<Unprivileged, PrivilegeError> {
        identity.validate()?;

        match self.switch.user_exists(identity.uid) {
            Ok(true) => {}
            Ok(false) => {
                return Err(PrivilegeError::IdentityInvalid {
                    uid: identity.uid,
                    gid: identity.gid,
                    reason: "uid has no user database entry".to_string(),
                });
            }
            Err(e) => {
                return Err(PrivilegeError::IdentityInvalid {
                    uid: identity.uid,
                    gid: identity.gid,
                    reason: format!("user lookup failed: {}", e),
                });
            }
        }

        debug!("Dropping to {}:{}", identity.uid, identity.gid);

        self.switch
            .set_groups(&[identity.gid])
            .map_err(|source| PrivilegeError::SyscallDenied {
                call: "setgroups",
                source,
            })?;
        self.switch
            .set_gid(identity.gid)
            .map_err(|source| PrivilegeError::SyscallDenied {
                call: "setresgid",
                source,
            })?;
        self.switch
            .set_uid(identity.uid)
            .map_err(|source| PrivilegeError::SyscallDenied {
                call: "setresuid",
                source,
            })?;

        if self.switch.regain_root().is_ok() || self.switch.effective_uid() == 0 {
            return Err(PrivilegeError::Reacquired { uid: identity.uid });
        }

        info!(
            "Privileges dropped to uid={} gid={}",
            identity.uid, identity.gid
        );

        Ok(Unprivileged {
            identity: identity.clone(),
        })
    }
}

impl Unprivileged {
    /// The identity the process switched to.
    pub fn identity(&self) -> &IdentityDescriptor {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Shared view into a [`FakeSwitch`] that survives the context being consumed.
    #[derive(Debug, Default)]
    struct FakeKernel {
        euid: Cell<u32>,
        groups: RefCell<Vec<u32>>,
        gid: Cell<u32>,
        calls: RefCell<Vec<&'static str>>,
        deny: Cell<Option<&'static str>>,
        unknown_users: bool,
    }

    #[derive(Debug, Clone)]
    struct FakeSwitch(Rc<FakeKernel>);

    impl FakeSwitch {
        fn root() -> (Self, Rc<FakeKernel>) {
            let kernel = Rc::new(FakeKernel::default());
            (Self(kernel.clone()), kernel)
        }

        fn check(&self, call: &'static str) -> nix::Result<()> {
            self.0.calls.borrow_mut().push(call);
            if self.0.deny.get() == Some(call) {
                return Err(nix::Error::EPERM);
            }
            Ok(())
        }
    }

    impl IdentitySwitch for FakeSwitch {
        fn effective_uid(&self) -> u32 {
            self.0.euid.get()
        }

        fn user_exists(&self, _uid: u32) -> nix::Result<bool> {
            Ok(!self.0.unknown_users)
        }

        fn set_groups(&self, gids: &[u32]) -> nix::Result<()> {
            self.check("setgroups")?;
            *self.0.groups.borrow_mut() = gids.to_vec();
            Ok(())
        }

        fn set_gid(&self, gid: u32) -> nix::Result<()> {
            self.check("setresgid")?;
            self.0.gid.set(gid);
            Ok(())
        }

        fn set_uid(&self, uid: u32) -> nix::Result<()> {
            self.check("setresuid")?;
            self.0.euid.set(uid);
            Ok(())
        }

        fn regain_root(&self) -> nix::Result<()> {
            self.check("setuid")?;
            if self.0.euid.get() != 0 {
                return Err(nix::Error::EPERM);
            }
            Ok(())
        }
    }

    #[test]
    fn test_acquire_requires_root() {
        let (switch, kernel) = FakeSwitch::root();
        kernel.euid.set(1000);
        assert!(matches!(
            PrivilegeContext::with_switch(switch),
            Err(PrivilegeError::NotPrivileged { euid: 1000 })
        ));
    }

    #[test]
    fn test_drop_switches_groups_then_ids() {
        let (switch, kernel) = FakeSwitch::root();
        let context = PrivilegeContext::with_switch(switch).unwrap();

        let unprivileged = context.drop_to(&IdentityDescriptor::default()).unwrap();

        assert_eq!(unprivileged.identity().uid, 65532);
        assert_eq!(kernel.euid.get(), 65532);
        assert_eq!(kernel.gid.get(), 65532);
        assert_eq!(*kernel.groups.borrow(), vec![65532]);
        assert_eq!(
            *kernel.calls.borrow(),
            vec!["setgroups", "setresgid", "setresuid", "setuid"]
        );
    }

    #[test]
    fn test_reacquire_after_drop_fails() {
        let (switch, kernel) = FakeSwitch::root();
        let probe = FakeSwitch(kernel.clone());
        let context = PrivilegeContext::with_switch(switch).unwrap();
        context.drop_to(&IdentityDescriptor::default()).unwrap();

        assert!(probe.regain_root().is_err());
        assert!(PrivilegeContext::with_switch(probe).is_err());
    }

    #[test]
    fn test_denied_setuid_is_fatal() {
        let (switch, kernel) = FakeSwitch::root();
        kernel.deny.set(Some("setresuid"));
        let context = PrivilegeContext::with_switch(switch).unwrap();

        let err = context.drop_to(&IdentityDescriptor::default()).unwrap_err();
        assert!(matches!(
            err,
            PrivilegeError::SyscallDenied {
                call: "setresuid",
                ..
            }
        ));
        assert_eq!(kernel.euid.get(), 0);
    }

    #[test]
    fn test_unknown_uid_rejected_before_any_syscall() {
        let kernel = Rc::new(FakeKernel {
            unknown_users: true,
            ..Default::default()
        });
        let context = PrivilegeContext::with_switch(FakeSwitch(kernel.clone())).unwrap();

        let err = context.drop_to(&IdentityDescriptor::default()).unwrap_err();
        assert!(matches!(err, PrivilegeError::IdentityInvalid { .. }));
        assert!(kernel.calls.borrow().is_empty());
    }

    #[test]
    fn test_root_target_rejected() {
        let (switch, kernel) = FakeSwitch::root();
        let context = PrivilegeContext::with_switch(switch).unwrap();
        let identity = IdentityDescriptor {
            uid: 0,
            ..Default::default()
        };

        assert!(context.drop_to(&identity).is_err());
        assert!(kernel.calls.borrow().is_empty());
    }
}
