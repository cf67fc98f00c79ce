//! Settings loading.
//!
//! Sources, lowest priority first:
//!
//! 1. Embedded defaults (compiled into binary)
//! 2. System settings: `/etc/marmithon/bootstrap.toml`, or the file given
//!    with `--config` instead
//! 3. CLI flags (highest priority)
//!
//! A missing system file is not an error. A missing `--config` file is.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::LoadError;
use super::schema::Settings;
use crate::cli::Cli;

/// System-wide settings path.
pub const SYSTEM_SETTINGS_PATH: &str = "/etc/marmithon/bootstrap.toml";

/// Settings loader.
pub struct SettingsLoader {
    /// Path to system-wide settings.
    system_path: PathBuf,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    /// Create a loader with the default system path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system_path: PathBuf::from(SYSTEM_SETTINGS_PATH),
        }
    }

    /// Create a loader with a custom system path (for testing).
    #[must_use]
    pub fn with_system_path(system_path: PathBuf) -> Self {
        Self { system_path }
    }

    /// Load settings, apply CLI overrides and validate the result.
    pub fn load(&self, cli: &Cli) -> Result<Settings, LoadError> {
        let mut settings = match cli.config {
            Some(ref path) => match self.load_file(path)? {
                Some(settings) => {
                    debug!("Loaded settings from {:?}", path);
                    settings
                }
                None => {
                    return Err(LoadError::ReadError {
                        path: path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified settings file not found",
                        ),
                    });
                }
            },
            None => match self.load_file(&self.system_path)? {
                Some(settings) => {
                    debug!("Loaded system settings from {:?}", self.system_path);
                    settings
                }
                None => {
                    debug!(
                        "No system settings at {:?}, using defaults",
                        self.system_path
                    );
                    Settings::default()
                }
            },
        };

        if let Some(secs) = cli.ready_timeout {
            debug!("Ready timeout overridden from CLI: {}s", secs);
            settings.mesh.ready_timeout_secs = secs;
        }
        if let Some(attempts) = cli.join_attempts {
            settings.mesh.join_attempts = attempts;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load a single settings file. Returns `Ok(None)` if it does not exist.
    fn load_file(&self, path: &Path) -> Result<Option<Settings>, LoadError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|e| LoadError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let settings = toml::from_str(&content).map_err(|e| LoadError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Some(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("marmithon-bootstrap").chain(args.iter().copied()))
    }

    #[test]
    fn test_missing_system_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("nonexistent.toml"));

        let settings = loader.load(&cli(&[])).unwrap();
        assert_eq!(settings.mesh.ready_timeout_secs, 30);
        assert_eq!(settings.app.binary, PathBuf::from("/app/marmithon"));
    }

    #[test]
    fn test_system_file_is_read() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("bootstrap.toml"),
            r#"
            [mesh]
            hostname = "marmithon"
            join_attempts = 5
            "#,
        )
        .unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("bootstrap.toml"));

        let settings = loader.load(&cli(&[])).unwrap();
        assert_eq!(settings.mesh.hostname.as_deref(), Some("marmithon"));
        assert_eq!(settings.mesh.join_attempts, 5);
    }

    #[test]
    fn test_explicit_file_replaces_system_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "[mesh]\nready_timeout_secs = 90\n").unwrap();
        fs::write(dir.path().join("custom.toml"), "[routing]\nipv6 = false\n").unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("system.toml"));
        let custom = dir.path().join("custom.toml");

        let settings = loader
            .load(&cli(&["--config", custom.to_str().unwrap()]))
            .unwrap();
        assert!(!settings.routing.ipv6);
        assert_eq!(settings.mesh.ready_timeout_secs, 30);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempdir().unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("system.toml"));
        let missing = dir.path().join("missing.toml");

        let err = loader
            .load(&cli(&["--config", missing.to_str().unwrap()]))
            .unwrap_err();
        assert!(matches!(err, LoadError::ReadError { .. }));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "[mesh\nbroken").unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("system.toml"));

        assert!(matches!(
            loader.load(&cli(&[])),
            Err(LoadError::ParseError { .. })
        ));
    }

    #[test]
    fn test_cli_flags_override_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "[mesh]\nready_timeout_secs = 90\n").unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("system.toml"));

        let settings = loader
            .load(&cli(&["--ready-timeout", "15", "--join-attempts", "1"]))
            .unwrap();
        assert_eq!(settings.mesh.ready_timeout_secs, 15);
        assert_eq!(settings.mesh.join_attempts, 1);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "[identity]\nuid = 0\n").unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("system.toml"));

        assert!(matches!(
            loader.load(&cli(&[])),
            Err(LoadError::InvalidValue { .. })
        ));
    }
}
