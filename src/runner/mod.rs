//! Test execution: the step interpreter, per-suite coordination and reporting.
//!
//! The pipeline per subtest is:
//! 1. Build the module binaries and the image (`backend`)
//! 2. Install the image on the remote host, if any
//! 3. Boot and wait for the banner (`console::boot`)
//! 4. Replay the steps and score them (`interpreter`)

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod coordinator;
pub mod interpreter;
pub mod report;

pub use coordinator::RunCoordinator;
pub use interpreter::{InterpreterState, RunResult, StepInterpreter, SubtestOutcome};
pub use report::{ConsoleReporter, SuiteReport, SuiteReporter};
