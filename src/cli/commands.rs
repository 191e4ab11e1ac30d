//! The autograder pipeline
//!
//! Stages, in order:
//! 1. Prepare: create the build directory and parse the boot manifest
//! 2. Hake: generate the `Makefile` when missing (or forced)
//! 3. Build: the base target
//! 4. Tests: one run per selector
//!
//! Pipeline functions return `CliResult` instead of calling `process::exit`.

use autograder_descriptors::{ModuleManifest, parse_manifest};
use tracing::info;

use super::{Cli, CliError, CliResult, ExitCode};
use crate::backend::build::BuildOrchestrator;
use crate::backend::process::{CommandRunner, SystemRunner};
use crate::config::{BuildMode, HarnessConfig, resolve_root};
use crate::console::ConsoleSpawner;
use crate::console::pty::PtySpawner;
use crate::errors::HarnessError;
use crate::runner::coordinator::RunCoordinator;
use crate::runner::report::{ConsoleReporter, SuiteReport};

/// Harness configuration from the command line flags.
pub fn config_from_cli(cli: &Cli) -> HarnessConfig {
    let mode = if cli.docker { BuildMode::Docker } else { BuildMode::Native };
    HarnessConfig::new(resolve_root(cli.root.as_deref()))
        .with_build_mode(mode)
        .with_force_configure(cli.force_hake)
        .with_board(cli.board.as_str())
        .with_local_device(cli.usb.as_str())
}

/// Run the full pipeline on the host.
pub fn run_pipeline(cli: &Cli) -> CliResult<ExitCode> {
    let config = config_from_cli(cli);
    let mut reporter = ConsoleReporter::new(cli.verbose);
    let report = execute(cli, &config, &SystemRunner, &PtySpawner, &mut reporter)?;
    Ok(exit_code_for(&report))
}

/// Run the pipeline with the given process runner and console spawner. Returns the totals over all selectors.
pub fn execute(
    cli: &Cli,
    config: &HarnessConfig,
    runner: &dyn CommandRunner,
    spawner: &dyn ConsoleSpawner,
    reporter: &mut ConsoleReporter,
) -> CliResult<SuiteReport> {
    let builder = BuildOrchestrator::new(config, runner);

    reporter.title("Prepare");
    builder.prepare().map_err(|e| fatal(reporter, e))?;
    let manifest = load_manifest(config, reporter)?;
    reporter.ok("preparation complete");

    reporter.title("Hake");
    builder.configure(config.force_configure).map_err(|e| fatal(reporter, e))?;
    reporter.ok("hake complete");

    reporter.title("Building Base OS Image");
    builder.build_base().map_err(|e| fatal(reporter, e))?;
    reporter.ok("built OS image");

    let coordinator = RunCoordinator::new(config, &manifest, runner, spawner).with_remote(cli.remote.as_ref());
    let mut total = SuiteReport::default();
    for selector in &cli.tests {
        let report = coordinator.run(selector, reporter).map_err(|e| fatal(reporter, e))?;
        total.merge(&report);
    }
    Ok(total)
}

fn load_manifest(config: &HarnessConfig, reporter: &ConsoleReporter) -> CliResult<ModuleManifest> {
    let path = config.manifest_path();
    info!("parsing menu.lst file '{}'", path.display());
    let manifest = parse_manifest(&path).map_err(|e| {
        reporter.error("incomplete parsing of the menu.lst");
        CliError::failure(format!("{:?}", miette::Report::new(e)))
    })?;
    info!("parsed menu.lst file, found total {} modules", manifest.binary_count());
    Ok(manifest)
}

/// Report a pipeline-ending error and turn it into a CLI failure.
fn fatal(reporter: &ConsoleReporter, err: HarnessError) -> CliError {
    reporter.error("execution failed");
    if let Some(build) = err.build_error() {
        reporter.build_output(build);
    }
    CliError::failure(err.to_string())
}

/// Failure when any subtest failed or errored.
pub fn exit_code_for(report: &SuiteReport) -> ExitCode {
    if report.has_problems() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
