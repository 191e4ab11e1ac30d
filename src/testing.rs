//! Scripted stand-ins for the hardware and the build system.
//!
//! These back the unit tests and the `tests/` integration suite: a [`ScriptedConsole`] replays console output that
//! the test feeds through a [`ScriptHandle`], and a [`RecordingRunner`] records every external command and reacts
//! to chosen ones (failing them, or making the console print something, as a real boot would).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;

use crate::backend::process::{CommandOutput, CommandRunner, Invocation};
use crate::console::{ConsoleError, ConsoleSpawner, ConsoleStream};
use crate::errors::HarnessError;
use crate::runner::interpreter::RunResult;
use crate::runner::report::{SuiteReport, SuiteReporter};

// ============================================================================
// Scripted console
// ============================================================================

#[derive(Debug, Default)]
struct ScriptState {
    pending: VecDeque<char>,
    sent: Vec<String>,
    responses: Vec<(String, String)>,
    closed: bool,
    echo_disabled: bool,
    terminated: usize,
}

/// Test-side control of a scripted console.
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle(Rc<RefCell<ScriptState>>);

impl ScriptHandle {
    /// Queue output for the console to read.
    pub fn emit(&self, text: &str) {
        self.0.borrow_mut().pending.extend(text.chars());
    }

    /// Emit `output` whenever exactly `trigger` is sent.
    pub fn respond_to(&self, trigger: &str, output: &str) {
        self.0.borrow_mut().responses.push((trigger.to_string(), output.to_string()));
    }

    /// Close the stream once queued output is read.
    pub fn hang_up(&self) {
        self.0.borrow_mut().closed = true;
    }

    /// Every `send` call, in order.
    pub fn sent(&self) -> Vec<String> {
        self.0.borrow().sent.clone()
    }

    pub fn transcript(&self) -> String {
        self.0.borrow().sent.concat()
    }

    pub fn echo_disabled(&self) -> bool {
        self.0.borrow().echo_disabled
    }

    pub fn terminate_count(&self) -> usize {
        self.0.borrow().terminated
    }
}

pub struct ScriptedConsole {
    handle: ScriptHandle,
}

impl ScriptedConsole {
    pub fn new() -> (Self, ScriptHandle) {
        let handle = ScriptHandle::default();
        (Self { handle: handle.clone() }, handle)
    }

    pub fn with_output(text: &str) -> (Self, ScriptHandle) {
        let (console, handle) = Self::new();
        handle.emit(text);
        (console, handle)
    }

    pub fn attached(handle: &ScriptHandle) -> Self {
        Self { handle: handle.clone() }
    }
}

impl ConsoleStream for ScriptedConsole {
    fn try_read(&mut self) -> Result<Option<char>, ConsoleError> {
        let mut state = self.handle.0.borrow_mut();
        match state.pending.pop_front() {
            Some(c) => Ok(Some(c)),
            None if state.closed => Err(ConsoleError::Closed),
            None => Ok(None),
        }
    }

    fn send(&mut self, text: &str) -> Result<(), ConsoleError> {
        let mut state = self.handle.0.borrow_mut();
        if state.closed {
            return Err(ConsoleError::Closed);
        }
        state.sent.push(text.to_string());
        let replies: Vec<String> = state
            .responses
            .iter()
            .filter(|(trigger, _)| trigger == text)
            .map(|(_, output)| output.clone())
            .collect();
        for reply in replies {
            state.pending.extend(reply.chars());
        }
        Ok(())
    }

    fn disable_echo(&mut self) -> Result<(), ConsoleError> {
        self.handle.0.borrow_mut().echo_disabled = true;
        Ok(())
    }

    fn terminate(&mut self) {
        self.handle.0.borrow_mut().terminated += 1;
    }
}

/// Hands out consoles that all share one [`ScriptHandle`].
#[derive(Default)]
pub struct ScriptedSpawner {
    handle: ScriptHandle,
    spawned: RefCell<Vec<Invocation>>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }

    pub fn spawned(&self) -> Vec<Invocation> {
        self.spawned.borrow().clone()
    }
}

impl ConsoleSpawner for ScriptedSpawner {
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn ConsoleStream>, ConsoleError> {
        self.spawned.borrow_mut().push(invocation.clone());
        Ok(Box::new(ScriptedConsole::attached(&self.handle)))
    }
}

// ============================================================================
// Recording command runner
// ============================================================================

#[derive(Debug, Clone)]
pub enum Reaction {
    /// Exit with status 2 and this stderr.
    Fail(String),
    /// Queue console output, as a boot printing to the serial line would.
    Emit(ScriptHandle, String),
    /// Create an empty file, as hake creating the `Makefile` would.
    Create(PathBuf),
    /// Report that the program could not be started.
    Missing,
}

struct Rule {
    needle: String,
    nth: Option<usize>,
    seen: usize,
    reaction: Reaction,
}

/// Records every invocation; succeeds unless a rule says otherwise.
#[derive(Default)]
pub struct RecordingRunner {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<Invocation>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// React to every invocation whose command line contains `needle`.
    pub fn on(self, needle: &str, reaction: Reaction) -> Self {
        self.push_rule(needle, None, reaction)
    }

    /// React only to the `n`th (1-based) invocation containing `needle`.
    pub fn on_nth(self, needle: &str, n: usize, reaction: Reaction) -> Self {
        self.push_rule(needle, Some(n), reaction)
    }

    fn push_rule(self, needle: &str, nth: Option<usize>, reaction: Reaction) -> Self {
        self.rules.borrow_mut().push(Rule {
            needle: needle.to_string(),
            nth,
            seen: 0,
            reaction,
        });
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Number of recorded invocations containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.display().contains(needle)).count()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        let line = invocation.display();

        let mut result = Ok(CommandOutput::ok());
        for rule in self.rules.borrow_mut().iter_mut() {
            if !line.contains(&rule.needle) {
                continue;
            }
            rule.seen += 1;
            if rule.nth.is_some_and(|n| n != rule.seen) {
                continue;
            }
            match &rule.reaction {
                Reaction::Fail(stderr) => {
                    if matches!(result, Ok(CommandOutput { success: true, .. })) {
                        result = Ok(CommandOutput::failed(2, stderr.clone()));
                    }
                }
                Reaction::Emit(handle, text) => handle.emit(text),
                Reaction::Create(path) => fs::write(path, "")?,
                Reaction::Missing => {
                    result = Err(io::Error::new(io::ErrorKind::NotFound, format!("{} not found", invocation.program)));
                }
            }
        }
        result
    }
}

// ============================================================================
// Event log reporter
// ============================================================================

/// Records reporter callbacks as short strings, e.g. `pass hello 5/5`.
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<String>,
}

impl SuiteReporter for EventLog {
    fn on_suite_start(&mut self, suite: &str, _title: &str, host: &str) {
        self.events.push(format!("start {suite} on {host}"));
    }

    fn on_subtest_start(&mut self, name: &str, _title: &str) {
        self.events.push(format!("run {name}"));
    }

    fn on_subtest_complete(&mut self, name: &str, result: &RunResult) {
        let status = if result.passed() { "pass" } else if result.errored() { "error" } else { "fail" };
        self.events
            .push(format!("{status} {name} {}/{}", result.points_earned, result.points_max));
    }

    fn on_subtest_error(&mut self, name: &str, _error: &HarnessError) {
        self.events.push(format!("error {name}"));
    }

    fn on_suite_complete(&mut self, suite: &str, report: &SuiteReport) {
        self.events.push(format!(
            "done {suite} {}/{} ok={} failed={} errors={}",
            report.points_earned, report.points_max, report.successes, report.failures, report.errors
        ));
    }
}
