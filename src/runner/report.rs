//! Suite results and their presentation.
//!
//! ## SuiteReporter Trait
//!
//! The coordinator reports through [`SuiteReporter`] so the output format is separate from execution.
//! [`ConsoleReporter`] prints the colored human-facing lines; tests use an event log.

use crate::backend::build::BuildError;
use crate::errors::HarnessError;

use super::interpreter::{RunResult, SubtestOutcome};

/// Aggregate over the subtests of one suite. Only ever added to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteReport {
    pub successes: usize,
    pub failures: usize,
    pub errors: usize,
    pub points_earned: u32,
    pub points_max: u32,
}

impl SuiteReport {
    /// Count a subtest that ran to an outcome. Only passed and failed runs count towards the points.
    pub fn record(&mut self, result: &RunResult) {
        match result.outcome {
            SubtestOutcome::Passed => self.successes += 1,
            SubtestOutcome::Failed => self.failures += 1,
            SubtestOutcome::Errored(_) => {
                self.errors += 1;
                return;
            }
        }
        self.points_earned = self.points_earned.saturating_add(result.points_earned);
        self.points_max = self.points_max.saturating_add(result.points_max);
    }

    /// Count a subtest that could not be run.
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn total(&self) -> usize {
        self.successes + self.failures + self.errors
    }

    /// Whether any subtest failed or errored.
    pub fn has_problems(&self) -> bool {
        self.failures > 0 || self.errors > 0
    }

    pub fn merge(&mut self, other: &SuiteReport) {
        self.successes += other.successes;
        self.failures += other.failures;
        self.errors += other.errors;
        self.points_earned = self.points_earned.saturating_add(other.points_earned);
        self.points_max = self.points_max.saturating_add(other.points_max);
    }
}

/// Receives progress from the run coordinator.
pub trait SuiteReporter {
    fn on_suite_start(&mut self, _suite: &str, _title: &str, _host: &str) {}

    fn on_subtest_start(&mut self, _name: &str, _title: &str) {}

    fn on_subtest_complete(&mut self, name: &str, result: &RunResult);

    /// A subtest could not be run (build, install or boot problem, or unknown name).
    fn on_subtest_error(&mut self, name: &str, error: &HarnessError);

    fn on_suite_complete(&mut self, suite: &str, report: &SuiteReport);
}

/// Colored terminal output.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    pub verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn title(&self, text: &str) {
        eprintln!();
        eprintln!("\x1b[1;34m{}\x1b[0m", text);
        eprintln!("\x1b[34m{}\x1b[0m", "=".repeat(text.chars().count()));
    }

    pub fn ok(&self, text: &str) {
        eprintln!("\x1b[32m[ OK ]\x1b[0m {}", text);
    }

    pub fn error(&self, text: &str) {
        eprintln!("\x1b[31m[ERROR]\x1b[0m {}", text);
    }

    /// Print the tail of a failed build.
    pub fn build_output(&self, error: &BuildError) {
        eprintln!("            <------------- start of error output ------------->");
        for line in error.tail() {
            eprintln!("             | {}", line);
        }
        eprintln!("            <-------------- end of error output -------------->");
    }
}

impl SuiteReporter for ConsoleReporter {
    fn on_suite_start(&mut self, _suite: &str, title: &str, host: &str) {
        self.title(&format!("Running Tests '{}' on '{}'", title, host));
    }

    fn on_subtest_start(&mut self, name: &str, title: &str) {
        if self.verbose {
            eprintln!("\x1b[1m[ RUN ]\x1b[0m {} ({})", title, name);
        } else {
            eprintln!("\x1b[1m[ RUN ]\x1b[0m {}", title);
        }
    }

    fn on_subtest_complete(&mut self, _name: &str, result: &RunResult) {
        match &result.outcome {
            SubtestOutcome::Passed => eprintln!(
                "\x1b[32m[PASS ]\x1b[0m Test Passed - {} / {} pts",
                result.points_earned, result.points_max
            ),
            SubtestOutcome::Failed => eprintln!(
                "\x1b[31m[FAIL ]\x1b[0m Test failed (timeout) - {} / {} pts",
                result.points_earned, result.points_max
            ),
            SubtestOutcome::Errored(reason) => self.error(&format!("Test had an error: {}", reason)),
        }
    }

    fn on_subtest_error(&mut self, name: &str, error: &HarnessError) {
        self.error(&format!("Test '{}' had an error: {}", name, error));
        if let Some(build) = error.build_error() {
            self.build_output(build);
        }
    }

    fn on_suite_complete(&mut self, suite: &str, report: &SuiteReport) {
        if report.errors > 0 {
            eprintln!("\x1b[33m[WARN ]\x1b[0m There were {} tests with errors", report.errors);
        }

        let color = if report.has_problems() { "\x1b[1;33m" } else { "\x1b[1;32m" };
        eprintln!(
            "{}[RESULT]\x1b[0m Test: '{}' - points {} / {} points.  total {} subtests. {} successful, {} failed",
            color,
            suite,
            report.points_earned,
            report.points_max,
            report.total(),
            report.successes,
            report.failures
        );
    }
}
