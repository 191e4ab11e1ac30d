//! Harness configuration.
//!
//! Every constant the harness relies on (boot banner, delays, build targets, console and boot commands) lives in
//! [`HarnessConfig`]. The defaults describe the i.MX8X Colibri setup; the CLI applies its flags on top with the
//! `with_*` builders.
//!
//! ## Layout
//!
//! All paths derive from the source tree root:
//!
//! - `<root>/build/` - build directory, gated by `<root>/build/Makefile`
//! - `<root>/hake/<manifest>` - base boot manifest
//! - `<root>/tools/autograder/tests/<suite>.json` - suite descriptors
//! - `<root>/build/platforms/arm/<manifest>` - composed manifest picked up by the image build

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the source tree root when `--root` is not given.
pub const ROOT_ENV: &str = "AUTOGRADER_ROOT";

/// Printed by the CPU driver once the kernel is entered.
pub const BOOT_BANNER: &str = "Barrelfish CPU driver starting on ARMv8";

/// Patterns that count as a failure in every `expect` step, ahead of the step's own patterns.
pub const DEFAULT_FAIL_PATTERNS: [&str; 3] = ["Aborted.", "Panic", "panic"];

/// How the external build is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    #[default]
    Native,
    /// Inside the CI container. Recognized but not supported.
    Docker,
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub root: PathBuf,
    pub build_mode: BuildMode,
    /// Re-run the configuration generator even when a `Makefile` exists.
    pub force_configure: bool,
    /// `make -j` value.
    pub parallelism: usize,

    pub boot_banner: String,
    /// Sleep after the first banner so userspace can come up.
    pub post_boot_delay: Duration,
    /// Delay between characters typed into the console.
    pub console_type_delay: Duration,
    pub default_fail_patterns: Vec<String>,

    /// Target built once before any test runs.
    pub base_target: String,
    /// File name of the boot manifest.
    pub manifest_name: String,
    pub image_name: String,
    pub configure_command: Vec<String>,
    pub docker_image: String,

    /// Serial device of the locally attached board.
    pub local_device: String,
    pub local_console_command: Vec<String>,
    /// `make` target that boots the local board over USB.
    pub local_boot_target: String,

    /// Rack board name.
    pub board: String,
    pub remote_console_command: Vec<String>,
    pub remote_boot_script: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            build_mode: BuildMode::Native,
            force_configure: false,
            parallelism: num_cpus::get().max(1),
            boot_banner: BOOT_BANNER.to_string(),
            post_boot_delay: Duration::from_secs(10),
            console_type_delay: Duration::from_millis(100),
            default_fail_patterns: DEFAULT_FAIL_PATTERNS.iter().map(|p| p.to_string()).collect(),
            base_target: "imx8x".to_string(),
            manifest_name: "menu.lst.armv8_imx8x".to_string(),
            image_name: "armv8_imx8x_image.efi".to_string(),
            configure_command: vec!["bash".into(), "../hake/hake.sh".into(), "-s".into(), "../".into()],
            docker_image: "achreto/barrelfish-ci".to_string(),
            local_device: "/dev/ttyUSB0".to_string(),
            local_console_command: vec!["picocom".into(), "-b".into(), "115200".into(), "-f".into(), "n".into()],
            local_boot_target: "usbboot_colibri".to_string(),
            board: "colibri5".to_string(),
            remote_console_command: vec!["console".into(), "-f".into()],
            remote_boot_script: "/home/netos/tools/bin/rackboot.sh".to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::default().with_root(root)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_build_mode(mut self, mode: BuildMode) -> Self {
        self.build_mode = mode;
        self
    }

    pub fn with_force_configure(mut self, force: bool) -> Self {
        self.force_configure = force;
        self
    }

    pub fn with_parallelism(mut self, jobs: usize) -> Self {
        self.parallelism = jobs.max(1);
        self
    }

    pub fn with_board(mut self, board: impl Into<String>) -> Self {
        self.board = board.into();
        self
    }

    pub fn with_local_device(mut self, device: impl Into<String>) -> Self {
        self.local_device = device.into();
        self
    }

    pub fn with_post_boot_delay(mut self, delay: Duration) -> Self {
        self.post_boot_delay = delay;
        self
    }

    pub fn with_console_type_delay(mut self, delay: Duration) -> Self {
        self.console_type_delay = delay;
        self
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    /// Presence of this file gates every `make` invocation.
    pub fn makefile_path(&self) -> PathBuf {
        self.build_dir().join("Makefile")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("hake").join(&self.manifest_name)
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.root.join("tools").join("autograder").join("tests")
    }

    pub fn suite_path(&self, suite: &str) -> PathBuf {
        self.tests_dir().join(format!("{suite}.json"))
    }

    pub fn platform_manifest_path(&self) -> PathBuf {
        self.build_dir().join("platforms").join("arm").join(&self.manifest_name)
    }

    pub fn image_path(&self) -> PathBuf {
        self.build_dir().join(&self.image_name)
    }

    /// Arguments for the rack boot script, board included.
    pub fn remote_boot_command(&self) -> Vec<String> {
        vec![self.remote_boot_script.clone(), "-b".to_string(), self.board.clone()]
    }
}

/// Pick the source tree root: explicit flag, then `AUTOGRADER_ROOT`, then the current directory.
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(root) = explicit {
        return root.to_path_buf();
    }

    if let Ok(root) = env::var(ROOT_ENV) {
        let path = PathBuf::from(root);
        if path.is_dir() {
            return path;
        }
        tracing::warn!("{} points at '{}', which is not a directory", ROOT_ENV, path.display());
    }

    PathBuf::from(".")
}
