//! Process exit codes.
//!
//! A failed bootstrap exits with a code naming the cause, so a container
//! orchestrator can tell a rejected key from an unreachable exit node
//! without reading logs. Codes are grouped by decade per component.

/// Settings file, CLI or environment invalid.
pub const CONFIG: u8 = 2;
/// Internal failure such as the async runtime not starting.
pub const RUNTIME: u8 = 3;

/// Mesh credential rejected.
pub const MESH_AUTH_REJECTED: u8 = 10;
/// Mesh did not come up in time.
pub const MESH_TIMEOUT: u8 = 11;
/// Mesh daemon could not be started or reached.
pub const MESH_DAEMON_UNAVAILABLE: u8 = 12;

/// Exit node is not a mesh peer.
pub const ROUTING_UNKNOWN_PEER: u8 = 20;
/// Exit node is offline or not offering itself.
pub const ROUTING_PEER_UNAVAILABLE: u8 = 21;
/// A routing rule could not be installed.
pub const ROUTING_INSTALL_FAILED: u8 = 22;
/// A routing rule could not be removed.
pub const ROUTING_REMOVE_FAILED: u8 = 23;

/// Unprivileged identity invalid.
pub const IDENTITY_INVALID: u8 = 30;
/// The kernel refused an identity switch.
pub const SYSCALL_DENIED: u8 = 31;
/// Started without root.
pub const NOT_PRIVILEGED: u8 = 32;
/// Root could be regained after the drop.
pub const PRIVILEGE_REACQUIRED: u8 = 33;

/// The application could not be executed.
pub const EXEC_FAILED: u8 = 40;
