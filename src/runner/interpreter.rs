//! Test step interpreter.
//!
//! Replays a subtest's steps against a booted console and keeps the score:
//!
//! ```text
//! AwaitingBoot --banner--> Running --all steps--> Passed
//!      |                      |--timeout--------> Failed
//!      '--------error---------'--error----------> Errored
//! ```
//!
//! `Passed` only means no step timed out; a subtest that hit its fail patterns passes with fewer points.

use std::thread;
use std::time::Duration;

use autograder_descriptors::{Subtest, TestStep};
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::console::boot::{BootError, BootSequencer};
use crate::console::{ConsoleError, ConsoleSession, EOT, PatternCategory, PatternSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterState {
    AwaitingBoot,
    Running,
    Passed,
    Failed,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtestOutcome {
    Passed,
    /// A console wait timed out.
    Failed,
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub outcome: SubtestOutcome,
    pub points_earned: u32,
    pub points_max: u32,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.outcome == SubtestOutcome::Passed
    }

    pub fn errored(&self) -> bool {
        matches!(self.outcome, SubtestOutcome::Errored(_))
    }
}

/// Why a step stopped the run.
enum StepFailure {
    Timeout(String),
    Error(String),
}

impl From<ConsoleError> for StepFailure {
    fn from(e: ConsoleError) -> Self {
        match e {
            ConsoleError::Timeout(_) => StepFailure::Timeout(e.to_string()),
            other => StepFailure::Error(other.to_string()),
        }
    }
}

impl From<BootError> for StepFailure {
    fn from(e: BootError) -> Self {
        match e {
            BootError::Timeout { .. } => StepFailure::Timeout(e.to_string()),
            other => StepFailure::Error(other.to_string()),
        }
    }
}

/// Runs one subtest. Consumed by [`StepInterpreter::run`].
pub struct StepInterpreter<'a> {
    config: &'a HarnessConfig,
    booter: &'a BootSequencer<'a>,
    session: ConsoleSession,
    subtest: &'a Subtest,
    state: InterpreterState,
    points: u32,
}

impl<'a> StepInterpreter<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        booter: &'a BootSequencer<'a>,
        session: ConsoleSession,
        subtest: &'a Subtest,
    ) -> Self {
        Self {
            config,
            booter,
            session,
            subtest,
            state: InterpreterState::AwaitingBoot,
            points: 0,
        }
    }

    pub fn state(&self) -> InterpreterState {
        self.state
    }

    /// Boot the target, run every step and score the run. The console is closed on return.
    pub fn run(mut self) -> RunResult {
        let points_max = self.subtest.points_max();
        let outcome = self.drive();
        self.session.close();

        let points_earned = match outcome {
            SubtestOutcome::Errored(_) => 0,
            _ => self.points,
        };
        match &outcome {
            SubtestOutcome::Passed => info!("test passed - {} / {} pts", points_earned, points_max),
            SubtestOutcome::Failed => warn!("test failed (timeout) - {} / {} pts", points_earned, points_max),
            SubtestOutcome::Errored(reason) => warn!("test had an error: {}", reason),
        }

        RunResult {
            outcome,
            points_earned,
            points_max,
        }
    }

    fn drive(&mut self) -> SubtestOutcome {
        let timeout = self.subtest.timeout();
        if let Err(e) = self.booter.boot_and_await(&mut self.session, timeout) {
            self.state = InterpreterState::Errored;
            return SubtestOutcome::Errored(e.to_string());
        }
        self.booter.settle();
        self.state = InterpreterState::Running;

        let subtest = self.subtest;
        for step in &subtest.steps {
            debug!(action = step.action(), "step");
            match self.execute(step, timeout) {
                Ok(()) => {}
                Err(StepFailure::Timeout(reason)) => {
                    debug!("{}", reason);
                    self.state = InterpreterState::Failed;
                    return SubtestOutcome::Failed;
                }
                Err(StepFailure::Error(reason)) => {
                    self.state = InterpreterState::Errored;
                    return SubtestOutcome::Errored(reason);
                }
            }
        }

        self.state = InterpreterState::Passed;
        SubtestOutcome::Passed
    }

    fn execute(&mut self, step: &TestStep, timeout: Duration) -> Result<(), StepFailure> {
        match step {
            TestStep::Wait { seconds } => {
                debug!("waiting for {} seconds", seconds);
                let pause = Duration::try_from_secs_f64(*seconds)
                    .map_err(|e| StepFailure::Error(format!("invalid wait of {seconds} seconds: {e}")))?;
                thread::sleep(pause);
            }
            TestStep::Expect { fail, pass, points } => {
                debug!("expecting {:?}", pass);
                let patterns = PatternSet::for_expect(&self.config.default_fail_patterns, fail, pass)?;
                let found = self.session.await_patterns(&patterns, timeout)?;
                match found.category {
                    PatternCategory::UserPass => self.points = self.points.saturating_add(*points),
                    PatternCategory::UserFail | PatternCategory::Default => {
                        warn!("matched fail pattern '{}', no points", found.text);
                    }
                }
            }
            TestStep::Reboot => {
                debug!("rebooting the platform");
                self.booter.boot_and_await(&mut self.session, timeout)?;
            }
            TestStep::Input { value } => {
                debug!("input {:?} to the console", value);
                let mut buf = [0u8; 4];
                for c in value.chars() {
                    self.session.send(c.encode_utf8(&mut buf))?;
                    self.session.send(EOT.encode_utf8(&mut buf))?;
                    thread::sleep(self.config.console_type_delay);
                }
                self.session.send("\n")?;
            }
        }
        Ok(())
    }
}
