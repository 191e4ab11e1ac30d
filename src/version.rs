//! Autograder version information.
//!
//! The value is taken from Cargo metadata (`CARGO_PKG_VERSION`) at compile time so the CLI banner and `--version`
//! agree.

/// The autograder version string (for example, `0.1.0-alpha.1`).
pub const AUTOGRADER_VERSION: &str = env!("CARGO_PKG_VERSION");
