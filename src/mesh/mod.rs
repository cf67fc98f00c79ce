//! Mesh VPN client supervision.
//!
//! Starts the mesh daemon, joins the mesh with the credential from the
//! environment when one is given, and waits until the tunnel is usable.
//!
//! ```text
//! MeshSupervisor ──► MeshControl ──► tailscaled   (spawned, outlives us)
//!       │                  └───────► tailscale up / status --json
//!       ▼
//! MeshConnectionState: Down → Authenticating → Connecting → Up | Failed
//! ```

mod control;
mod credential;
mod error;
mod handle;
mod status;
mod supervisor;

pub use control::{MeshControl, TailscaleControl};
pub use credential::MeshCredential;
pub use error::SupervisorError;
pub use handle::DaemonHandle;
pub use status::{BackendState, MeshConnectionState, MeshPeer, MeshStatus};
pub use supervisor::MeshSupervisor;
