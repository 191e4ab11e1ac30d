//! CLI module for the autograder
//!
//! ## Usage
//!
//! ```text
//! autograder -t m1:hello:spawn -t m2:all              # local board on /dev/ttyUSB0
//! autograder -r rack:/srv/tftp/image.efi -b colibri2 -t m1
//! ```
//!
//! ## Modules
//!
//! - `commands` - the prepare / hake / build / test pipeline
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Pipeline functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process;

use autograder_descriptors::Selector;
use clap::Parser;

use crate::backend::remote::RemoteSpec;
use crate::version::AUTOGRADER_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Build, boot and grade an OS image on real hardware
#[derive(Parser, Debug)]
#[command(name = "autograder")]
#[command(version = AUTOGRADER_VERSION)]
#[command(about = "Build, boot and grade an OS image on real hardware", long_about = None)]
pub struct Cli {
    /// Increase output verbosity
    #[arg(short, long)]
    pub verbose: bool,

    /// Use the docker image to compile (not supported yet)
    #[arg(short, long)]
    pub docker: bool,

    /// Run hake even when a Makefile exists
    #[arg(short = 'f', long = "forcehake")]
    pub force_hake: bool,

    /// The tests to run
    #[arg(short, long, value_name = "TEST[:SUBTEST...]", num_args = 1..)]
    pub tests: Vec<Selector>,

    /// Run on a rack board through this host, installing the image at the given path
    #[arg(short, long, value_name = "HOST:PATH")]
    pub remote: Option<RemoteSpec>,

    /// The rack board to use
    #[arg(short, long, default_value = "colibri5")]
    pub board: String,

    /// The console usbserial to use
    #[arg(short, long, value_name = "DEVICE", default_value = "/dev/ttyUSB0")]
    pub usb: String,

    /// Source tree root (default: $AUTOGRADER_ROOT, then the current directory)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. The pipeline
/// returns `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match commands::run_pipeline(&cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Structured logging to stderr, filtered by `RUST_LOG`, defaulting to `info` (`debug` with `--verbose`).
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .try_init();
}

// ============================================================================
// Tests
// ============================================================================
