//! Running the git executable

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {args} exited with {status}: {stderr}")]
    Failed {
        args: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Location of the git executable every subprocess is started from
#[derive(Debug, Clone)]
pub struct GitBinary {
    path: PathBuf,
}

impl GitBinary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A git command running in `dir`, killed if its handle is dropped.
    pub fn command(&self, dir: &Path) -> Command {
        let mut command = Command::new(&self.path);
        command.current_dir(dir).kill_on_drop(true);
        command
    }

    /// Run git to completion and collect stdout. `protocol` is forwarded as
    /// `GIT_PROTOCOL` when set.
    pub async fn output<I, S>(
        &self,
        dir: &Path,
        protocol: Option<&str>,
        args: I,
    ) -> Result<Vec<u8>, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = self.command(dir);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(version) = protocol.filter(|v| !v.is_empty()) {
            command.env("GIT_PROTOCOL", version);
        }

        let args_display = format!("{:?}", command.as_std().get_args().collect::<Vec<_>>());
        debug!(dir = %dir.display(), args = %args_display, "running git");

        let output = command.output().await.map_err(|source| CommandError::Spawn {
            program: self.path.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                args: args_display,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    /// Value of a repository config key, `None` when unset.
    pub async fn config_value(&self, dir: &Path, key: &str) -> Option<String> {
        let out = self.output(dir, None, ["config", key]).await.ok()?;
        let value = String::from_utf8_lossy(&out);
        Some(value.trim_end_matches('\n').to_string())
    }

    /// Regenerate `info/refs` and `objects/info/packs` for dumb clients.
    pub async fn update_server_info(&self, dir: &Path) -> Result<(), CommandError> {
        self.output(dir, None, ["update-server-info"]).await.map(|_| ())
    }
}

impl Default for GitBinary {
    fn default() -> Self {
        Self::new("git")
    }
}
