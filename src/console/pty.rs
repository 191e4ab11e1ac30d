//! PTY-backed consoles.
//!
//! The terminal program (`picocom` or the rack `console` over SSH) runs as a child on a pseudo terminal through
//! `rexpect`. Pattern matching stays in [`super::ConsoleSession`]; this stream only moves characters.

use rexpect::process::wait::WaitStatus;
use rexpect::session::{PtySession, spawn_command};
use tracing::debug;

use super::{ConsoleError, ConsoleSpawner, ConsoleStream};
use crate::backend::process::Invocation;

pub struct PtyConsole {
    session: PtySession,
    command: String,
}

impl PtyConsole {
    pub fn spawn(invocation: &Invocation) -> Result<Self, ConsoleError> {
        let command = invocation.display();
        debug!("starting console with command '{}'", command);
        let session = spawn_command(invocation.to_command(), None).map_err(|e| ConsoleError::Spawn {
            command: command.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { session, command })
    }

    fn alive(&self) -> bool {
        matches!(self.session.process.status(), Some(WaitStatus::StillAlive))
    }
}

impl ConsoleStream for PtyConsole {
    fn try_read(&mut self) -> Result<Option<char>, ConsoleError> {
        match self.session.try_read() {
            Some(c) => Ok(Some(c)),
            None if self.alive() => Ok(None),
            None => Err(ConsoleError::Closed),
        }
    }

    fn send(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.session.send(text).map_err(|e| ConsoleError::Io(e.to_string()))?;
        self.session.flush().map_err(|e| ConsoleError::Io(e.to_string()))
    }

    // rexpect starts children with terminal echo already off.

    fn terminate(&mut self) {
        debug!("terminating console '{}'", self.command);
        if let Err(e) = self.session.process.exit() {
            debug!("console '{}' did not exit cleanly: {}", self.command, e);
        }
    }
}

/// Spawns [`PtyConsole`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl ConsoleSpawner for PtySpawner {
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn ConsoleStream>, ConsoleError> {
        Ok(Box::new(PtyConsole::spawn(invocation)?))
    }
}
