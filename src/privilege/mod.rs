//! Privilege context: root at startup, the `nonroot` identity afterwards.
//!
//! The transition is modeled with ownership. A [`PrivilegeContext`] is the
//! only way to call [`PrivilegeContext::drop_to`], which consumes it and
//! yields an [`Unprivileged`] token. The token in turn is the only way to
//! reach [`exec_as`], so the application can never be started while the
//! process still holds root.
//!
//! ```text
//! PrivilegeContext ──drop_to──► Unprivileged ──exec_as──► application
//!     (uid 0)                   (uid 65532)              (process image replaced)
//! ```

mod context;
mod error;
mod exec;
mod identity;

pub use context::{PrivilegeContext, Unprivileged};
pub use error::{ExecError, PrivilegeError};
pub use exec::{AppCommand, exec_as};
pub use identity::{IdentityDescriptor, IdentitySwitch, NONROOT_ID, SystemIdentity};
