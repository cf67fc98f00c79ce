//! Replacing the bootstrap process with the application.

use nix::unistd::{chdir, execve};
use std::convert::Infallible;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use tracing::info;

use super::context::Unprivileged;
use super::error::ExecError;
use super::identity::IdentityDescriptor;
use crate::config::AppSettings;

/// Fully resolved application invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCommand {
    /// Absolute path of the application binary.
    pub program: PathBuf,
    /// Arguments after argv[0].
    pub args: Vec<String>,
    /// Working directory entered before exec.
    pub work_dir: PathBuf,
    /// Complete environment handed to the application.
    pub env: Vec<(OsString, OsString)>,
}

impl AppCommand {
    /// Build the invocation from settings and the bootstrap's own environment.
    ///
    /// `args` replaces `app.args` when non-empty. Variables named in
    /// `app.scrub_env` are removed and `HOME` points at the identity's home.
    pub fn resolve<I>(
        app: &AppSettings,
        identity: &IdentityDescriptor,
        args: &[String],
        inherited: I,
    ) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut env: Vec<(OsString, OsString)> = inherited
            .into_iter()
            .filter(|(key, _)| {
                key != "HOME" && !app.scrub_env.iter().any(|scrub| key == scrub.as_str())
            })
            .collect();
        env.push((OsString::from("HOME"), identity.home.clone().into_os_string()));

        Self {
            program: app.binary.clone(),
            args: if args.is_empty() {
                app.args.clone()
            } else {
                args.to_vec()
            },
            work_dir: app.work_dir.clone(),
            env,
        }
    }

    /// Look up a variable in the resolved environment.
    pub fn env_var(&self, key: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    fn argv(&self) -> Result<Vec<CString>, ExecError> {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsStr::new))
            .map(to_cstring)
            .collect()
    }

    fn envp(&self) -> Result<Vec<CString>, ExecError> {
        self.env
            .iter()
            .map(|(key, value)| {
                let mut entry = key.clone();
                entry.push("=");
                entry.push(value);
                to_cstring(&entry)
            })
            .collect()
    }
}

/// Replace the current process image with the application.
///
/// Consumes the [`Unprivileged`] token: only a process that has completed the
/// privilege drop can get here. Returns only on failure.
pub fn exec_as(identity: Unprivileged, command: &AppCommand) -> Result<Infallible, ExecError> {
    let argv = command.argv()?;
    let envp = command.envp()?;
    let program = to_cstring(command.program.as_os_str())?;

    chdir(&command.work_dir).map_err(|source| ExecError::WorkDir {
        path: command.work_dir.clone(),
        source,
    })?;

    info!(
        "Executing {:?} as uid={} in {:?}",
        command.program,
        identity.identity().uid,
        command.work_dir
    );

    execve(&program, &argv, &envp).map_err(|source| ExecError::Exec {
        program: command.program.clone(),
        source,
    })
}

fn to_cstring(value: &OsStr) -> Result<CString, ExecError> {
    CString::new(value.as_bytes())
        .map_err(|_| ExecError::InvalidArgument(value.to_string_lossy().into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn test_resolve_scrubs_credential_and_sets_home() {
        let command = AppCommand::resolve(
            &AppSettings::default(),
            &IdentityDescriptor::default(),
            &[],
            vars(&[
                ("TS_AUTHKEY", "tskey-secret"),
                ("HOME", "/root"),
                ("EXIT_NODE_IP", "100.64.0.9"),
                ("PATH", "/usr/bin"),
            ]),
        );

        assert!(command.env_var("TS_AUTHKEY").is_none());
        assert_eq!(command.env_var("HOME"), Some(OsStr::new("/app")));
        assert_eq!(command.env_var("EXIT_NODE_IP"), Some(OsStr::new("100.64.0.9")));
        assert_eq!(command.env_var("PATH"), Some(OsStr::new("/usr/bin")));
    }

    #[test]
    fn test_cli_args_override_settings_args() {
        let app = AppSettings {
            args: vec!["-config".to_string(), "marmithon.toml".to_string()],
            ..Default::default()
        };
        let identity = IdentityDescriptor::default();

        let from_settings = AppCommand::resolve(&app, &identity, &[], Vec::new());
        assert_eq!(from_settings.args, vec!["-config", "marmithon.toml"]);

        let overridden =
            AppCommand::resolve(&app, &identity, &["-config".to_string(), "prod.toml".to_string()], Vec::new());
        assert_eq!(overridden.args, vec!["-config", "prod.toml"]);
    }

    #[test]
    fn test_argv_starts_with_program() {
        let app = AppSettings {
            args: vec!["-config".to_string(), "marmithon.toml".to_string()],
            ..Default::default()
        };
        let command = AppCommand::resolve(&app, &IdentityDescriptor::default(), &[], Vec::new());

        let argv = command.argv().unwrap();
        assert_eq!(argv[0].to_str().unwrap(), "/app/marmithon");
        assert_eq!(argv.len(), 3);
    }

    #[test]
    fn test_envp_rejects_nul() {
        let command = AppCommand::resolve(
            &AppSettings::default(),
            &IdentityDescriptor::default(),
            &[],
            vars(&[("BROKEN", "a\0b")]),
        );
        assert!(matches!(command.envp(), Err(ExecError::InvalidArgument(_))));
    }
}
