//! Settings and environment for the bootstrap.
//!
//! Two inputs drive a run:
//!
//! - **Settings** (TOML): deployment constants baked into the image, such as
//!   daemon paths, routing table and mark, the unprivileged identity and the
//!   application path. Loaded from `/etc/marmithon/bootstrap.toml` or
//!   `--config`, falling back to built-in defaults.
//! - **Environment**: per-deployment values, `TS_AUTHKEY` and
//!   `EXIT_NODE_IP`, read once at startup.
//!
//! ```toml
//! [mesh]
//! hostname = "marmithon"
//! ready_timeout_secs = 30
//!
//! [routing]
//! ipv6 = false
//!
//! [app]
//! args = ["-config", "marmithon.toml"]
//! ```

mod environment;
mod error;
mod loader;
mod schema;

pub use environment::{AUTHKEY_VAR, BootstrapEnv, EXIT_NODE_VAR};
pub use error::LoadError;
pub use loader::{SYSTEM_SETTINGS_PATH, SettingsLoader};
pub use schema::{AppSettings, MeshSettings, RoutingSettings, Settings};
