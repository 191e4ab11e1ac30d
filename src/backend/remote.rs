//! Remote rack targets reached over SSH.
//!
//! One SSH master connection is opened per suite; every later `ssh`/`scp` call (image install, boot script,
//! console) multiplexes over its control socket. The connection is torn down explicitly after the suite and again
//! on drop.

use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::process::{CommandOutput, CommandRunner, Invocation};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("invalid remote '{0}', expected <host>:<path>")]
    InvalidSpec(String),

    #[error("could not connect to '{host}': {reason}")]
    Connect { host: String, reason: String },

    #[error("could not install image to '{host}:{path}': {reason}")]
    Install { host: String, path: String, reason: String },
}

impl RemoteError {
    /// Whether the suite cannot proceed at all.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, RemoteError::InvalidSpec(_) | RemoteError::Connect { .. })
    }
}

/// `host:path` given with `--remote`: the machine driving the rack and the image install path on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub host: String,
    pub path: String,
}

impl FromStr for RemoteSpec {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((host, path)) if !host.is_empty() && !path.is_empty() => Ok(Self {
                host: host.to_string(),
                path: path.to_string(),
            }),
            _ => Err(RemoteError::InvalidSpec(s.to_string())),
        }
    }
}

/// Multiplexed SSH connection to a remote host.
pub struct SshConnection<'a> {
    host: String,
    control_path: PathBuf,
    runner: &'a dyn CommandRunner,
    open: bool,
}

impl<'a> SshConnection<'a> {
    /// Start a background master connection to `host`.
    pub fn open(host: &str, runner: &'a dyn CommandRunner) -> Result<Self, RemoteError> {
        let socket = format!(
            "autograder-{}-{}.sock",
            process::id(),
            host.replace(|c: char| !c.is_ascii_alphanumeric(), "_")
        );
        let control_path = env::temp_dir().join(socket);

        let invocation = Invocation::new("ssh")
            .args(["-o", "ControlMaster=yes", "-o", "ControlPersist=yes"])
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .args(["-f", "-N"])
            .arg(host);

        info!("connecting to '{}'", host);
        let output = runner.run(&invocation).map_err(|e| RemoteError::Connect {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        if !output.success {
            return Err(RemoteError::Connect {
                host: host.to_string(),
                reason: output.combined().trim().to_string(),
            });
        }

        Ok(Self {
            host: host.to_string(),
            control_path,
            runner,
            open: true,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// `ssh` invocation running `remote_args` on the host over the control socket.
    pub fn command<I, S>(&self, remote_args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ssh_invocation(&self.host, &self.control_path).args(remote_args)
    }

    /// Run a command on the host and wait for it.
    pub fn run<I, S>(&self, remote_args: I) -> std::io::Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(&self.command(remote_args))
    }

    /// Copy a local file to `remote_path` on the host.
    pub fn install(&self, local: &Path, remote_path: &str) -> Result<(), RemoteError> {
        let invocation = Invocation::new("scp")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(local.display().to_string())
            .arg(format!("{}:{}", self.host, remote_path));

        info!("installing '{}' to '{}:{}'", local.display(), self.host, remote_path);
        let install_error = |reason: String| RemoteError::Install {
            host: self.host.clone(),
            path: remote_path.to_string(),
            reason,
        };
        let output = self.runner.run(&invocation).map_err(|e| install_error(e.to_string()))?;
        if !output.success {
            return Err(install_error(output.combined().trim().to_string()));
        }
        Ok(())
    }

    /// Stop the master connection. Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let invocation = ssh_invocation(&self.host, &self.control_path).args(["-O", "exit"]);
        debug!("closing connection to '{}'", self.host);
        match self.runner.run(&invocation) {
            Ok(output) if output.success => {}
            Ok(output) => warn!("closing connection to '{}' failed: {}", self.host, output.combined().trim()),
            Err(e) => warn!("closing connection to '{}' failed: {}", self.host, e),
        }
    }
}

impl Drop for SshConnection<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// `ssh -o ControlPath=<socket> <host>`, ready for remote arguments.
pub fn ssh_invocation(host: &str, control_path: &Path) -> Invocation {
    Invocation::new("ssh")
        .arg("-o")
        .arg(format!("ControlPath={}", control_path.display()))
        .arg(host)
}
