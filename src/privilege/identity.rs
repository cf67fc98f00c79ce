//! Process identities and the syscalls that switch between them.

use nix::unistd::{Gid, Uid, User, setgroups, setresgid, setresuid, setuid};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::error::PrivilegeError;

/// Default unprivileged uid/gid baked into the image (`nonroot`).
pub const NONROOT_ID: u32 = 65532;

/// The fixed unprivileged identity the application runs under.
///
/// The privileged side is always uid 0 and needs no description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityDescriptor {
    /// Numeric user id.
    pub uid: u32,
    /// Numeric group id, also the only supplementary group.
    pub gid: u32,
    /// Home directory exported as `HOME` to the application.
    pub home: PathBuf,
}

impl Default for IdentityDescriptor {
    fn default() -> Self {
        Self {
            uid: NONROOT_ID,
            gid: NONROOT_ID,
            home: PathBuf::from("/app"),
        }
    }
}

impl IdentityDescriptor {
    /// Reject identities that would leave the application privileged.
    pub fn validate(&self) -> Result<(), PrivilegeError> {
        let reason = if self.uid == 0 {
            "target uid is root"
        } else if self.gid == 0 {
            "target gid is root"
        } else {
            return Ok(());
        };

        Err(PrivilegeError::IdentityInvalid {
            uid: self.uid,
            gid: self.gid,
            reason: reason.to_string(),
        })
    }
}

/// The identity syscalls used by [`PrivilegeContext`](super::PrivilegeContext).
///
/// [`SystemIdentity`] is the real implementation; tests substitute a fake so
/// the state machine can be exercised without root.
pub trait IdentitySwitch {
    /// Current effective uid.
    fn effective_uid(&self) -> u32;

    /// Whether the user database knows `uid`.
    fn user_exists(&self, uid: u32) -> nix::Result<bool>;

    /// Replace the supplementary group list.
    fn set_groups(&self, gids: &[u32]) -> nix::Result<()>;

    /// Set real, effective and saved gid.
    fn set_gid(&self, gid: u32) -> nix::Result<()>;

    /// Set real, effective and saved uid.
    fn set_uid(&self, uid: u32) -> nix::Result<()>;

    /// Attempt to become root again. Must fail once privileges are dropped.
    fn regain_root(&self) -> nix::Result<()>;
}

/// Identity switching through the real kernel interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentitySwitch for SystemIdentity {
    fn effective_uid(&self) -> u32 {
        Uid::effective().as_raw()
    }

    fn user_exists(&self, uid: u32) -> nix::Result<bool> {
        User::from_uid(Uid::from_raw(uid)).map(|user| user.is_some())
    }

    fn set_groups(&self, gids: &[u32]) -> nix::Result<()> {
        let gids: Vec<Gid> = gids.iter().copied().map(Gid::from_raw).collect();
        setgroups(&gids)
    }

    fn set_gid(&self, gid: u32) -> nix::Result<()> {
        let gid = Gid::from_raw(gid);
        setresgid(gid, gid, gid)
    }

    fn set_uid(&self, uid: u32) -> nix::Result<()> {
        let uid = Uid::from_raw(uid);
        setresuid(uid, uid, uid)
    }

    fn regain_root(&self) -> nix::Result<()> {
        setuid(Uid::from_raw(0))
    }
}
