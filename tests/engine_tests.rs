//! End-to-end runs of the test engine against a scratch source tree.
//!
//! External commands go to a `RecordingRunner` and the board is a scripted console: "booting" makes the console
//! print the CPU driver banner, as the real board does over the serial line.

use std::fs;
use std::path::Path;
use std::time::Duration;

use autograder::backend::remote::RemoteSpec;
use autograder::cli::commands::{exit_code_for, execute};
use autograder::cli::{Cli, ExitCode};
use autograder::config::{BOOT_BANNER, BuildMode, HarnessConfig};
use autograder::errors::HarnessError;
use autograder::runner::coordinator::RunCoordinator;
use autograder::runner::report::{ConsoleReporter, SuiteReport};
use autograder::testing::{EventLog, Reaction, RecordingRunner, ScriptedSpawner};
use autograder_descriptors::{ModuleManifest, Selector, parse_manifest};
use clap::Parser;
use tempfile::TempDir;

const MENU: &str = "\
timeout 0
title   Barrelfish
bootdriver /armv8/sbin/boot_armv8_generic
cpudriver /armv8/sbin/cpu_imx8x loglevel=3
module /armv8/sbin/init
mmap map 0x80000000 0x40000000 1
";

const SUITE: &str = r#"{
    "title": "Milestone 1",
    "tests": {
        "broken": {
            "title": "module that does not build",
            "modules": [["/armv8/sbin/broken"]],
            "timeout": 0.3,
            "teststeps": [
                { "action": "expect", "fail": [], "pass": ["never"], "points": 4 }
            ]
        },
        "hello": {
            "title": "spawn hello",
            "modules": [["/armv8/sbin/hello", "world"]],
            "timeout": 0.3,
            "teststeps": [
                { "action": "expect", "fail": ["unknown command"], "pass": ["Hello, world"], "points": 5 }
            ]
        },
        "partial": {
            "title": "second line never shows",
            "timeout": 0.3,
            "teststeps": [
                { "action": "expect", "fail": [], "pass": ["Hello"], "points": 2 },
                { "action": "expect", "fail": [], "pass": ["Goodbye"], "points": 3 }
            ]
        }
    }
}"#;

// ============================================================================
// Fixtures
// ============================================================================

struct Tree {
    dir: TempDir,
}

impl Tree {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/Makefile"), "").unwrap();
        fs::create_dir_all(root.join("hake")).unwrap();
        fs::write(root.join("hake/menu.lst.armv8_imx8x"), MENU).unwrap();
        fs::create_dir_all(root.join("tools/autograder/tests")).unwrap();
        fs::write(root.join("tools/autograder/tests/m1.json"), SUITE).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> HarnessConfig {
        HarnessConfig::new(self.root())
            .with_parallelism(4)
            .with_post_boot_delay(Duration::ZERO)
            .with_console_type_delay(Duration::ZERO)
    }

    fn manifest(&self) -> ModuleManifest {
        parse_manifest(&self.config().manifest_path()).unwrap()
    }
}

/// Every local boot prints the banner followed by `after`.
fn board(spawner: &ScriptedSpawner, after: &str) -> RecordingRunner {
    RecordingRunner::new().on(
        "usbboot_colibri",
        Reaction::Emit(spawner.handle(), format!("{BOOT_BANNER}\r\n{after}")),
    )
}

fn selector(s: &str) -> Selector {
    s.parse().unwrap()
}

// ============================================================================
// Coordinator
// ============================================================================

#[test]
fn test_error_does_not_stop_the_queue() {
    let tree = Tree::new();
    let config = tree.config();
    let manifest = tree.manifest();
    let spawner = ScriptedSpawner::new();
    let runner = board(&spawner, "Hello, world\n").on("armv8/sbin/broken", Reaction::Fail("no rule".into()));
    let mut log = EventLog::default();

    let report = RunCoordinator::new(&config, &manifest, &runner, &spawner)
        .run(&selector("m1:broken:hello"), &mut log)
        .unwrap();

    assert_eq!(
        report,
        SuiteReport {
            successes: 1,
            failures: 0,
            errors: 1,
            points_earned: 5,
            points_max: 5,
        }
    );
    assert_eq!(
        log.events,
        vec![
            "start m1 on localhost",
            "run broken",
            "error broken",
            "run hello",
            "pass hello 5/5",
            "done m1 5/5 ok=1 failed=0 errors=1",
        ]
    );
    // the broken subtest never reached the image build or the board
    assert_eq!(runner.count("armv8_imx8x_image.efi"), 1);
    assert_eq!(spawner.spawned().len(), 1);
}

#[test]
fn test_subtest_pipeline_commands() {
    let tree = Tree::new();
    let config = tree.config();
    let manifest = tree.manifest();
    let spawner = ScriptedSpawner::new();
    let runner = board(&spawner, "Hello, world\n");
    let mut log = EventLog::default();

    RunCoordinator::new(&config, &manifest, &runner, &spawner)
        .run(&selector("m1:hello"), &mut log)
        .unwrap();

    let calls: Vec<String> = runner.calls().iter().map(|c| c.display()).collect();
    assert_eq!(
        calls,
        vec![
            "make -j 4 armv8/sbin/init armv8/sbin/hello",
            "make -j 4 armv8_imx8x_image.efi",
            "make usbboot_colibri",
        ]
    );
    assert!(runner.calls().iter().all(|c| c.cwd.as_deref() == Some(config.build_dir().as_path())));
    assert_eq!(spawner.spawned()[0].display(), "picocom -b 115200 -f n /dev/ttyUSB0");
    assert_eq!(spawner.handle().terminate_count(), 1);

    let composed = fs::read_to_string(config.platform_manifest_path()).unwrap();
    insta::assert_snapshot!(composed, @r"
    timeout 0
    title   Barrelfish
    bootdriver armv8/sbin/boot_armv8_generic
    cpudriver armv8/sbin/cpu_imx8x loglevel=3
    module armv8/sbin/init
    mmap map 0x80000000 0x40000000 1
    module armv8/sbin/hello world
    ");
}

#[test]
fn test_timeout_fails_with_partial_points() {
    let tree = Tree::new();
    let config = tree.config();
    let manifest = tree.manifest();
    let spawner = ScriptedSpawner::new();
    let runner = board(&spawner, "Hello\n");
    let mut log = EventLog::default();

    let report = RunCoordinator::new(&config, &manifest, &runner, &spawner)
        .run(&selector("m1:partial"), &mut log)
        .unwrap();

    assert_eq!((report.failures, report.points_earned, report.points_max), (1, 2, 5));
    assert_eq!(exit_code_for(&report), ExitCode::FAILURE);
}

#[test]
fn test_all_expands_in_descriptor_order() {
    let tree = Tree::new();
    let config = tree.config();
    let manifest = tree.manifest();
    let spawner = ScriptedSpawner::new();
    let runner = board(&spawner, "Hello, world\n").on("armv8/sbin/broken", Reaction::Fail("no rule".into()));
    let mut log = EventLog::default();

    let report = RunCoordinator::new(&config, &manifest, &runner, &spawner)
        .run(&selector("m1:hello:all"), &mut log)
        .unwrap();

    let runs: Vec<&str> = log.events.iter().filter(|e| e.starts_with("run ")).map(String::as_str).collect();
    assert_eq!(runs, vec!["run broken", "run hello", "run partial"]);
    assert_eq!(report.total(), 3);
    // the broken subtest errors and adds nothing to the ceiling
    assert_eq!(report.points_max, 5 + 5);
}

#[test]
fn test_unknown_subtest_is_an_error() {
    let tree = Tree::new();
    let config = tree.config();
    let manifest = tree.manifest();
    let spawner = ScriptedSpawner::new();
    let runner = board(&spawner, "Hello, world\n");
    let mut log = EventLog::default();

    let report = RunCoordinator::new(&config, &manifest, &runner, &spawner)
        .run(&selector("m1:nope:hello"), &mut log)
        .unwrap();

    assert_eq!((report.errors, report.successes), (1, 1));
    assert_eq!(report.points_max, 5);
    assert!(log.events.contains(&"error nope".to_string()));
}

#[test]
fn test_missing_suite_is_fatal() {
    let tree = Tree::new();
    let config = tree.config();
    let manifest = tree.manifest();
    let spawner = ScriptedSpawner::new();
    let runner = RecordingRunner::new();
    let mut log = EventLog::default();

    let err = RunCoordinator::new(&config, &manifest, &runner, &spawner)
        .run(&selector("m9"), &mut log)
        .unwrap_err();
    assert!(matches!(err, HarnessError::Suite(_)));
    assert!(err.is_fatal());
    assert!(log.events.is_empty());
}

#[test]
fn test_missing_makefile_stops_the_suite_after_summary() {
    let tree = Tree::new();
    fs::remove_file(tree.root().join("build/Makefile")).unwrap();
    let config = tree.config();
    let manifest = tree.manifest();
    let spawner = ScriptedSpawner::new();
    let runner = RecordingRunner::new();
    let mut log = EventLog::default();

    let err = RunCoordinator::new(&config, &manifest, &runner, &spawner)
        .run(&selector("m1:hello:partial"), &mut log)
        .unwrap_err();
    assert!(matches!(err, HarnessError::ConfigurationMissing(_)));
    assert_eq!(log.events.last().unwrap(), "done m1 0/0 ok=0 failed=0 errors=1");
    assert!(runner.calls().is_empty());
}

#[test]
fn test_remote_target() {
    let tree = Tree::new();
    let config = tree.config().with_board("colibri2");
    let manifest = tree.manifest();
    let spawner = ScriptedSpawner::new();
    let runner = RecordingRunner::new().on(
        "rackboot.sh",
        Reaction::Emit(spawner.handle(), format!("{BOOT_BANNER}\nHello, world\n")),
    );
    let remote: RemoteSpec = "rack:/srv/tftp/colibri2.efi".parse().unwrap();
    let mut log = EventLog::default();

    let report = RunCoordinator::new(&config, &manifest, &runner, &spawner)
        .with_remote(Some(&remote))
        .run(&selector("m1:hello"), &mut log)
        .unwrap();

    assert_eq!(report.successes, 1);
    assert_eq!(log.events[0], "start m1 on rack");

    let calls: Vec<String> = runner.calls().iter().map(|c| c.display()).collect();
    assert!(calls[0].contains("ControlMaster=yes"));
    assert!(calls[3].starts_with("scp "));
    assert!(calls[3].ends_with("armv8_imx8x_image.efi rack:/srv/tftp/colibri2.efi"));
    assert!(calls[4].ends_with("rack /home/netos/tools/bin/rackboot.sh -b colibri2"));
    assert!(calls.last().unwrap().ends_with("rack -O exit"));
    assert!(spawner.spawned()[0].display().ends_with("rack console -f colibri2"));
}

#[test]
fn test_unreachable_remote_is_fatal() {
    let tree = Tree::new();
    let config = tree.config();
    let manifest = tree.manifest();
    let spawner = ScriptedSpawner::new();
    let runner = RecordingRunner::new().on("ControlMaster", Reaction::Fail("no route to host".into()));
    let remote: RemoteSpec = "rack:/srv/x.efi".parse().unwrap();
    let mut log = EventLog::default();

    let err = RunCoordinator::new(&config, &manifest, &runner, &spawner)
        .with_remote(Some(&remote))
        .run(&selector("m1:hello"), &mut log)
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(runner.calls().len(), 1);
}

// ============================================================================
// Full pipeline
// ============================================================================

fn cli(root: &Path, extra: &[&str]) -> Cli {
    let mut args = vec!["autograder", "--root", root.to_str().unwrap()];
    args.extend_from_slice(extra);
    Cli::try_parse_from(args).unwrap()
}

#[test]
fn test_pipeline_runs_hake_when_makefile_missing() {
    let tree = Tree::new();
    let makefile = tree.root().join("build/Makefile");
    fs::remove_file(&makefile).unwrap();

    let cli = cli(tree.root(), &["-t", "m1:hello"]);
    let config = tree.config();
    let spawner = ScriptedSpawner::new();
    let runner = board(&spawner, "Hello, world\n").on("hake.sh", Reaction::Create(makefile.clone()));
    let mut reporter = ConsoleReporter::default();

    let report = execute(&cli, &config, &runner, &spawner, &mut reporter).unwrap();
    assert_eq!(report.successes, 1);
    assert_eq!(exit_code_for(&report), ExitCode::SUCCESS);

    let calls: Vec<String> = runner.calls().iter().map(|c| c.display()).collect();
    assert_eq!(calls[0], "bash ../hake/hake.sh -s ../");
    assert_eq!(calls[1], "make -j 4 imx8x");
    assert!(makefile.exists());
}

#[test]
fn test_pipeline_skips_hake_unless_forced() {
    let tree = Tree::new();
    let spawner = ScriptedSpawner::new();
    let mut reporter = ConsoleReporter::default();

    let runner = RecordingRunner::new();
    execute(&cli(tree.root(), &[]), &tree.config(), &runner, &spawner, &mut reporter).unwrap();
    assert_eq!(runner.count("hake.sh"), 0);

    let runner = RecordingRunner::new();
    let forced = tree.config().with_force_configure(true);
    execute(&cli(tree.root(), &[]), &forced, &runner, &spawner, &mut reporter).unwrap();
    assert_eq!(runner.count("hake.sh"), 1);
}

#[test]
fn test_pipeline_base_build_failure_is_fatal() {
    let tree = Tree::new();
    let spawner = ScriptedSpawner::new();
    let runner = RecordingRunner::new().on("imx8x", Reaction::Fail("error: no rule to make target".into()));
    let mut reporter = ConsoleReporter::default();

    let err = execute(&cli(tree.root(), &["-t", "m1"]), &tree.config(), &runner, &spawner, &mut reporter)
        .unwrap_err();
    assert_eq!(err.exit_code, ExitCode::FAILURE);
    assert!(err.message.starts_with("base build failed: 'make -j 4 imx8x'"));
    assert!(spawner.spawned().is_empty());
}

#[test]
fn test_pipeline_docker_is_unsupported() {
    let tree = Tree::new();
    let spawner = ScriptedSpawner::new();
    let runner = RecordingRunner::new();
    let mut reporter = ConsoleReporter::default();
    let config = tree.config().with_build_mode(BuildMode::Docker);

    let err = execute(&cli(tree.root(), &["-d"]), &config, &runner, &spawner, &mut reporter).unwrap_err();
    assert!(err.message.contains("docker"));
    assert!(runner.calls().is_empty());
}

#[test]
fn test_pipeline_bad_manifest_is_fatal() {
    let tree = Tree::new();
    fs::write(tree.root().join("hake/menu.lst.armv8_imx8x"), "module /armv8/sbin/init\n").unwrap();
    let spawner = ScriptedSpawner::new();
    let runner = RecordingRunner::new();
    let mut reporter = ConsoleReporter::default();

    let err = execute(&cli(tree.root(), &["-t", "m1"]), &tree.config(), &runner, &spawner, &mut reporter)
        .unwrap_err();
    assert!(err.message.contains("bootdriver"));
    assert!(runner.calls().is_empty());
}
