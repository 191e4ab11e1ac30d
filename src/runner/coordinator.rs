//! Run coordination for one selector.
//!
//! For every selected subtest: build the module binaries, compose and build the image, install it when the target
//! is remote, boot, and interpret the steps. A subtest that cannot be run is counted as an error and the queue
//! moves on; only invocation-level problems (a missing descriptor, a missing `Makefile`, an unreachable remote
//! host) stop the suite.

use autograder_descriptors::{ModuleManifest, Selector, Subtest, load_suite};
use tracing::{error, info};

use super::interpreter::{RunResult, StepInterpreter};
use super::report::{SuiteReport, SuiteReporter};
use crate::backend::build::BuildOrchestrator;
use crate::backend::image::ImageComposer;
use crate::backend::process::CommandRunner;
use crate::backend::remote::{RemoteSpec, SshConnection};
use crate::config::HarnessConfig;
use crate::console::ConsoleSpawner;
use crate::console::boot::{BootSequencer, BootTarget};
use crate::errors::{HarnessError, HarnessResult};

pub struct RunCoordinator<'a> {
    config: &'a HarnessConfig,
    manifest: &'a ModuleManifest,
    runner: &'a dyn CommandRunner,
    spawner: &'a dyn ConsoleSpawner,
    remote: Option<&'a RemoteSpec>,
}

impl<'a> RunCoordinator<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        manifest: &'a ModuleManifest,
        runner: &'a dyn CommandRunner,
        spawner: &'a dyn ConsoleSpawner,
    ) -> Self {
        Self {
            config,
            manifest,
            runner,
            spawner,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Option<&'a RemoteSpec>) -> Self {
        self.remote = remote;
        self
    }

    /// Run the subtests named by `selector` and report them. The summary is reported even when the suite stops on
    /// a fatal error.
    pub fn run(&self, selector: &Selector, reporter: &mut dyn SuiteReporter) -> HarnessResult<SuiteReport> {
        let suite_path = self.config.suite_path(&selector.suite);
        let suite = load_suite(&suite_path)?;
        info!("loaded test description from '{}'", suite_path.display());

        let mut connection = match self.remote {
            Some(remote) => Some(SshConnection::open(&remote.host, self.runner)?),
            None => None,
        };
        let host = self.remote.map_or("localhost", |r| r.host.as_str());
        reporter.on_suite_start(&selector.suite, &suite.title, host);

        let mut report = SuiteReport::default();
        let mut fatal = None;
        for name in selector.resolve(&suite) {
            let Some(subtest) = suite.get(&name) else {
                let err = HarnessError::UnknownSubtest {
                    suite: selector.suite.clone(),
                    subtest: name.clone(),
                };
                report.record_error();
                reporter.on_subtest_error(&name, &err);
                continue;
            };

            reporter.on_subtest_start(&name, &subtest.title);
            match self.run_subtest(subtest, connection.as_ref()) {
                Ok(result) => {
                    report.record(&result);
                    reporter.on_subtest_complete(&name, &result);
                }
                Err(err) => {
                    error!("test '{}' had an error: {}", name, err);
                    report.record_error();
                    reporter.on_subtest_error(&name, &err);
                    if err.is_fatal() {
                        fatal = Some(err);
                        break;
                    }
                }
            }
        }

        if let Some(conn) = connection.as_mut() {
            conn.close();
        }
        reporter.on_suite_complete(&selector.suite, &report);

        match fatal {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    fn run_subtest(&self, subtest: &Subtest, connection: Option<&SshConnection<'_>>) -> HarnessResult<RunResult> {
        let builder = BuildOrchestrator::new(self.config, self.runner);
        builder.build_targets(&self.manifest.module_binaries(&subtest.modules))?;

        let image = ImageComposer::new(&builder).compose_and_build(self.manifest, &subtest.modules)?;

        let target = match (connection, self.remote) {
            (Some(conn), Some(remote)) => {
                conn.install(&image, &remote.path)?;
                BootTarget::remote(conn, self.config)
            }
            _ => BootTarget::local(self.config),
        };

        let booter = BootSequencer::new(self.config, target, self.runner, self.spawner);
        let session = booter.open_console()?;
        Ok(StepInterpreter::new(self.config, &booter, session, subtest).run())
    }
}
