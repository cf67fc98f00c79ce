//! The mesh join credential.

use std::fmt;

/// Bearer token used to join the mesh (`TS_AUTHKEY`).
///
/// Read once at startup and never printed: `Debug` is redacted and there is
/// no `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct MeshCredential(String);

impl MeshCredential {
    /// Wrap a token, stored as given. Blank tokens mean "no credential"
    /// and yield `None`.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    /// The raw token, for handing to the mesh control CLI.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MeshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MeshCredential(<redacted>)")
    }
}
