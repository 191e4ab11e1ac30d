//! Image composition.
//!
//! A test run boots the base manifest extended with the subtest's modules. The composed manifest keeps the base
//! file's line order: uninterpreted lines are copied verbatim, interpreted directives are re-rendered in place with
//! their normalized command lines, and the subtest modules are appended at the end.

use std::fs;
use std::path::PathBuf;

use autograder_descriptors::{DirectiveKind, ModuleManifest};
use tracing::debug;

use super::build::BuildOrchestrator;
use crate::errors::{HarnessError, HarnessResult};

/// Render the manifest for a run with `extra` modules appended.
pub fn compose(manifest: &ModuleManifest, extra: &[Vec<String>]) -> String {
    let mut out = String::new();
    let mut modules = manifest.modules.iter();
    for line in &manifest.original_lines {
        let rendered = match line.directive() {
            Some(kind @ DirectiveKind::BootDriver) => Some(kind.render(&manifest.boot_driver)),
            Some(kind @ DirectiveKind::CpuDriver) => Some(kind.render(&manifest.cpu_driver)),
            Some(kind @ DirectiveKind::Module) => modules.next().map(|cmdline| kind.render(cmdline)),
            None => None,
        };
        out.push_str(rendered.as_deref().unwrap_or(&line.text));
        out.push('\n');
    }
    for cmdline in extra {
        out.push_str(&DirectiveKind::Module.render(cmdline));
        out.push('\n');
    }
    out
}

/// Writes composed manifests into the build tree and builds the image from them.
pub struct ImageComposer<'a> {
    builder: &'a BuildOrchestrator<'a>,
}

impl<'a> ImageComposer<'a> {
    pub fn new(builder: &'a BuildOrchestrator<'a>) -> Self {
        Self { builder }
    }

    /// Write the composed manifest to the platform directory and build the image. Returns the image path.
    pub fn compose_and_build(&self, manifest: &ModuleManifest, extra: &[Vec<String>]) -> HarnessResult<PathBuf> {
        let config = self.builder.config();
        let target = config.platform_manifest_path();
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).map_err(|e| HarnessError::io(dir, e))?;
        }

        let text = compose(manifest, extra);
        debug!(modules = manifest.modules.len() + extra.len(), "writing '{}'", target.display());
        fs::write(&target, text).map_err(|e| HarnessError::io(&target, e))?;

        self.builder.build_image()?;
        Ok(config.image_path())
    }
}
