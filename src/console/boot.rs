//! Booting the target and waiting for the kernel.
//!
//! A local board sits on a USB serial adapter and is booted with a `make` target in the build directory. A rack
//! board is reached through the remote host: its console via `console -f <board>` and its boot via the rack boot
//! script, both over the suite's SSH control socket.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use super::{ConsoleError, ConsoleSession, ConsoleSpawner, PatternSet};
use crate::backend::process::{CommandRunner, Invocation};
use crate::backend::remote::{SshConnection, ssh_invocation};
use crate::config::HarnessConfig;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("could not boot the board with '{command}': {reason}")]
    Command { command: String, reason: String },

    #[error("did not see expected boot string '{banner}' within {timeout:?}")]
    Timeout { banner: String, timeout: Duration },

    #[error(transparent)]
    Console(#[from] ConsoleError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootTarget {
    Local {
        device: String,
    },
    Remote {
        host: String,
        board: String,
        control_path: PathBuf,
    },
}

impl BootTarget {
    pub fn local(config: &HarnessConfig) -> Self {
        BootTarget::Local {
            device: config.local_device.clone(),
        }
    }

    pub fn remote(connection: &SshConnection<'_>, config: &HarnessConfig) -> Self {
        BootTarget::Remote {
            host: connection.host().to_string(),
            board: config.board.clone(),
            control_path: connection.control_path().to_path_buf(),
        }
    }

    /// Host name for reports.
    pub fn host(&self) -> &str {
        match self {
            BootTarget::Local { .. } => "localhost",
            BootTarget::Remote { host, .. } => host,
        }
    }
}

/// Opens consoles for, and boots, one target.
pub struct BootSequencer<'a> {
    config: &'a HarnessConfig,
    target: BootTarget,
    runner: &'a dyn CommandRunner,
    spawner: &'a dyn ConsoleSpawner,
}

impl<'a> BootSequencer<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        target: BootTarget,
        runner: &'a dyn CommandRunner,
        spawner: &'a dyn ConsoleSpawner,
    ) -> Self {
        Self {
            config,
            target,
            runner,
            spawner,
        }
    }

    pub fn target(&self) -> &BootTarget {
        &self.target
    }

    pub fn console_invocation(&self) -> Invocation {
        match &self.target {
            BootTarget::Local { device } => {
                let (program, args) = match self.config.local_console_command.split_first() {
                    Some((program, args)) => (program.as_str(), args),
                    None => ("picocom", &[][..]),
                };
                Invocation::new(program).args(args.iter().cloned()).arg(device.as_str())
            }
            BootTarget::Remote {
                host,
                board,
                control_path,
            } => ssh_invocation(host, control_path)
                .args(self.config.remote_console_command.iter().cloned())
                .arg(board.as_str()),
        }
    }

    pub fn boot_invocation(&self) -> Invocation {
        match &self.target {
            BootTarget::Local { .. } => Invocation::new("make")
                .arg(self.config.local_boot_target.as_str())
                .current_dir(self.config.build_dir()),
            BootTarget::Remote { host, control_path, .. } => {
                ssh_invocation(host, control_path).args(self.config.remote_boot_command())
            }
        }
    }

    pub fn open_console(&self) -> Result<ConsoleSession, BootError> {
        let stream = self.spawner.spawn(&self.console_invocation())?;
        Ok(ConsoleSession::new(stream))
    }

    /// Issue the boot command and wait for it to finish.
    pub fn boot(&self) -> Result<(), BootError> {
        let invocation = self.boot_invocation();
        info!("booting with '{}'", invocation);

        let command_error = |reason: String| BootError::Command {
            command: invocation.display(),
            reason,
        };
        let output = self.runner.run(&invocation).map_err(|e| command_error(e.to_string()))?;
        if !output.success {
            return Err(command_error(output.combined().trim().to_string()));
        }
        Ok(())
    }

    /// Wait for the CPU driver banner.
    pub fn await_banner(&self, session: &mut ConsoleSession, timeout: Duration) -> Result<(), BootError> {
        debug!("waiting for '{}'", self.config.boot_banner);
        let banner = PatternSet::literal(&self.config.boot_banner)?;
        match session.await_patterns(&banner, timeout) {
            Ok(_) => Ok(()),
            Err(ConsoleError::Timeout(_)) => Err(BootError::Timeout {
                banner: self.config.boot_banner.clone(),
                timeout,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Boot, wait for the banner, then turn off echo on the console.
    pub fn boot_and_await(&self, session: &mut ConsoleSession, timeout: Duration) -> Result<(), BootError> {
        self.boot()?;
        self.await_banner(session, timeout)?;
        session.disable_echo()?;
        Ok(())
    }

    /// Give userspace time to come up after the first boot.
    pub fn settle(&self) {
        if !self.config.post_boot_delay.is_zero() {
            debug!("waiting {:?} for userspace", self.config.post_boot_delay);
            thread::sleep(self.config.post_boot_delay);
        }
    }
}
