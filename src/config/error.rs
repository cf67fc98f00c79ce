//! Settings error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading settings and the bootstrap environment.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Failed to read a settings file.
    #[error("Failed to read settings file {path}: {source}")]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a TOML settings file.
    #[error("Failed to parse settings file {path}: {source}")]
    ParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// A settings value is invalid.
    #[error("Invalid settings value for {field}: {message}")]
    InvalidValue {
        /// The field name that has an invalid value.
        field: String,
        /// Description of why the value is invalid.
        message: String,
    },

    /// An environment variable could not be interpreted.
    #[error("Invalid value for environment variable {var}: {message}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Description of why the value is invalid.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_env_display() {
        let err = LoadError::InvalidEnv {
            var: "EXIT_NODE_IP",
            message: "invalid IP address syntax".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("EXIT_NODE_IP"));
        assert!(msg.contains("invalid IP address syntax"));
    }
}
