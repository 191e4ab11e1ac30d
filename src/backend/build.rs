//! Build orchestration.
//!
//! Wraps the external build system: the hake configuration generator and `make -j <n> <targets>` inside the build
//! directory. The orchestrator never interprets build output; a failing command becomes a [`BuildError`] carrying
//! the combined output so the reporter can show its tail.

use std::fmt;
use std::fs;

use thiserror::Error;
use tracing::{debug, info};

use super::process::{CommandOutput, CommandRunner, Invocation};
use crate::config::{BuildMode, HarnessConfig};
use crate::errors::{HarnessError, HarnessResult};

/// Number of output lines shown for a failed build.
pub const TAIL_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Configure,
    Base,
    Targets,
    Image,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStage::Configure => "hake",
            BuildStage::Base => "base build",
            BuildStage::Targets => "module build",
            BuildStage::Image => "image build",
        })
    }
}

/// A build command exited unsuccessfully.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed: '{command}' exited with status {}", .exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
pub struct BuildError {
    pub stage: BuildStage,
    pub command: String,
    pub exit_code: Option<i32>,
    /// Full combined stdout and stderr.
    pub output: String,
}

impl BuildError {
    fn new(stage: BuildStage, invocation: &Invocation, output: &CommandOutput) -> Self {
        Self {
            stage,
            command: invocation.display(),
            exit_code: output.exit_code,
            output: output.combined(),
        }
    }

    /// Output lines for display. Output longer than [`TAIL_LINES`] lines is cut to a "N more lines" header, a blank
    /// line and the last lines.
    pub fn tail(&self) -> Vec<String> {
        let lines: Vec<&str> = self.output.lines().collect();
        if lines.len() <= TAIL_LINES {
            return lines.into_iter().map(str::to_string).collect();
        }

        let mut tail = Vec::with_capacity(TAIL_LINES + 1);
        tail.push(format!("{} more lines", lines.len() - TAIL_LINES));
        tail.push(String::new());
        tail.extend(lines[lines.len() - (TAIL_LINES - 1)..].iter().map(|l| l.to_string()));
        tail
    }
}

/// Drives the external build for one invocation.
pub struct BuildOrchestrator<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(config: &'a HarnessConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &HarnessConfig {
        self.config
    }

    /// Create the build directory if it does not exist yet.
    pub fn prepare(&self) -> HarnessResult<()> {
        let build_dir = self.config.build_dir();
        if build_dir.is_dir() {
            info!("build path '{}' already exists", build_dir.display());
            return Ok(());
        }

        info!("creating build path '{}'", build_dir.display());
        fs::create_dir_all(&build_dir).map_err(|e| HarnessError::io(&build_dir, e))
    }

    /// Run hake when the `Makefile` is missing or `force` is set. Returns whether hake ran.
    pub fn configure(&self, force: bool) -> HarnessResult<bool> {
        self.require_native()?;
        if self.config.makefile_path().exists() && !force {
            info!("Makefile exists, skipping hake (use --forcehake to run it anyway)");
            return Ok(false);
        }

        let Some((program, args)) = self.config.configure_command.split_first() else {
            return Err(HarnessError::UnsupportedConfiguration(
                "empty configuration command".to_string(),
            ));
        };
        let invocation = Invocation::new(program.as_str())
            .args(args.iter().cloned())
            .current_dir(self.config.build_dir());

        info!("running hake");
        self.execute(BuildStage::Configure, &invocation)?;
        Ok(true)
    }

    /// Build the base target once before any test.
    pub fn build_base(&self) -> HarnessResult<()> {
        info!("building base target '{}' with {} jobs", self.config.base_target, self.config.parallelism);
        self.make(BuildStage::Base, std::slice::from_ref(&self.config.base_target))
    }

    /// Build `targets`, dropping duplicates. Nothing to build is a no-op.
    pub fn build_targets(&self, targets: &[String]) -> HarnessResult<()> {
        let mut unique: Vec<String> = Vec::with_capacity(targets.len());
        for target in targets {
            if !unique.contains(target) {
                unique.push(target.clone());
            }
        }
        if unique.is_empty() {
            debug!("no module targets to build");
            return Ok(());
        }
        self.make(BuildStage::Targets, &unique)
    }

    /// Build the bootable image from the composed manifest.
    pub fn build_image(&self) -> HarnessResult<()> {
        self.make(BuildStage::Image, std::slice::from_ref(&self.config.image_name))
    }

    fn require_native(&self) -> HarnessResult<()> {
        match self.config.build_mode {
            BuildMode::Native => Ok(()),
            BuildMode::Docker => Err(HarnessError::UnsupportedConfiguration(format!(
                "building with docker image '{}' is not supported",
                self.config.docker_image
            ))),
        }
    }

    fn make(&self, stage: BuildStage, targets: &[String]) -> HarnessResult<()> {
        self.require_native()?;
        let makefile = self.config.makefile_path();
        if !makefile.exists() {
            return Err(HarnessError::ConfigurationMissing(makefile));
        }

        let invocation = Invocation::new("make")
            .arg("-j")
            .arg(self.config.parallelism.to_string())
            .args(targets.iter().cloned())
            .current_dir(self.config.build_dir());
        self.execute(stage, &invocation).map(|_| ())
    }

    fn execute(&self, stage: BuildStage, invocation: &Invocation) -> HarnessResult<CommandOutput> {
        debug!(%stage, cwd = ?invocation.cwd, "command: '{}'", invocation);
        let output = self.runner.run(invocation).map_err(|source| HarnessError::Spawn {
            command: invocation.display(),
            source,
        })?;

        if !output.success {
            let err = BuildError::new(stage, invocation, &output);
            debug!(%stage, "full build output:\n{}", err.output);
            return Err(err.into());
        }
        Ok(output)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn error_with_lines(n: usize) -> BuildError {
        BuildError {
            stage: BuildStage::Image,
            command: "make".into(),
            exit_code: Some(2),
            output: (1..=n).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n"),
        }
    }

    #[test]
    fn test_tail_short_output_is_complete() {
        let tail = error_with_lines(10).tail();
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[0], "line 1");
    }

    #[test]
    fn test_tail_long_output_is_cut() {
        let tail = error_with_lines(25).tail();
        assert_eq!(tail[0], "15 more lines");
        assert_eq!(tail[1], "");
        assert_eq!(&tail[2..], &(17..=25).map(|i| format!("line {i}")).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn test_docker_runs_nothing() {
        let config = HarnessConfig::new("/nonexistent").with_build_mode(BuildMode::Docker);
        let runner = crate::testing::RecordingRunner::new();
        let builder = BuildOrchestrator::new(&config, &runner);

        assert!(matches!(builder.configure(true), Err(HarnessError::UnsupportedConfiguration(_))));
        assert!(matches!(builder.build_base(), Err(HarnessError::UnsupportedConfiguration(_))));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_make_requires_makefile() {
        let config = HarnessConfig::new("/nonexistent");
        let runner = crate::testing::RecordingRunner::new();
        let builder = BuildOrchestrator::new(&config, &runner);

        let err = builder.build_image().unwrap_err();
        assert!(matches!(err, HarnessError::ConfigurationMissing(_)));
        assert!(err.is_fatal());
        assert!(builder.build_targets(&[]).is_ok());
    }

    #[test]
    fn test_build_error_message() {
        assert_eq!(
            error_with_lines(1).to_string(),
            "image build failed: 'make' exited with status 2"
        );
    }
}
