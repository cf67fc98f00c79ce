//! Bootstrap inputs taken from the process environment.

use std::ffi::OsString;

use super::error::LoadError;
use crate::mesh::MeshCredential;
use crate::routing::ExitNodeSetting;

/// Mesh join credential.
pub const AUTHKEY_VAR: &str = "TS_AUTHKEY";

/// Exit node address.
pub const EXIT_NODE_VAR: &str = "EXIT_NODE_IP";

/// Environment snapshot taken once at process start.
#[derive(Debug, Clone)]
pub struct BootstrapEnv {
    /// Join credential; `None` means the daemon is expected to be authorized.
    pub credential: Option<MeshCredential>,
    /// Exit-node configuration.
    pub exit_node: ExitNodeSetting,
}

impl BootstrapEnv {
    /// Read the real process environment.
    pub fn from_process() -> Result<Self, LoadError> {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    /// Read through an arbitrary lookup (tests use a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LoadError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let credential = read_utf8(&lookup, AUTHKEY_VAR)?.and_then(MeshCredential::new);

        let raw_exit_node = read_utf8(&lookup, EXIT_NODE_VAR)?;
        let exit_node = ExitNodeSetting::parse(raw_exit_node.as_deref()).map_err(|e| {
            LoadError::InvalidEnv {
                var: EXIT_NODE_VAR,
                message: format!("{:?} is not an IP address ({})", raw_exit_node, e),
            }
        })?;

        Ok(Self {
            credential,
            exit_node,
        })
    }
}

fn read_utf8<F>(lookup: &F, var: &'static str) -> Result<Option<String>, LoadError>
where
    F: Fn(&str) -> Option<OsString>,
{
    lookup(var)
        .map(|value| {
            value.into_string().map_err(|_| LoadError::InvalidEnv {
                var,
                message: "value is not valid UTF-8".to_string(),
            })
        })
        .transpose()
}
