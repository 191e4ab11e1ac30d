#![forbid(unsafe_code)]
//! Hardware-in-the-loop autograder
//!
//! Builds a boot image with a configurable module set, boots it on a local or rack-mounted board, drives the serial
//! console through scripted steps and scores the run.
//!
//! ## Layout
//!
//! - `autograder_descriptors` (workspace crate) - boot manifest, suite descriptors, selectors
//! - `backend` - external commands: hake, `make`, image composition, SSH
//! - `console` - console streams, pattern waits, booting
//! - `runner` - step interpreter, run coordinator, reporting
//! - `cli` - command line front end
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli`, `backend`, `console`
//!   and `runner` modules enforce `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod backend;
pub mod cli;
pub mod config;
pub mod console;
pub mod errors;
pub mod runner;
#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;
pub mod version;

pub use autograder_descriptors as descriptors;
pub use config::HarnessConfig;
pub use errors::{HarnessError, HarnessResult};
pub use runner::{RunCoordinator, SuiteReport};
