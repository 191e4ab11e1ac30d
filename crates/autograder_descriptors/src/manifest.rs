//! Boot manifest (`menu.lst`) parsing.
//!
//! The manifest is line oriented:
//!
//! ```text
//! title     Barrelfish
//! bootdriver /armv8/sbin/boot_armv8_generic
//! cpudriver  /armv8/sbin/cpu_imx8x loglevel=3   # trailing comments are dropped
//! module     /armv8/sbin/init
//! mmap map   0x80000000 0x40000000 1
//! ```
//!
//! Only `bootdriver`, `cpudriver` and `module` are interpreted. Every other line (titles, memory maps, comments,
//! blank lines) is kept verbatim in [`ModuleManifest::original_lines`] so a composed manifest carries it through
//! unchanged.
//!
//! Module paths are written absolute in the manifest but built relative to the build tree, so a single leading `/`
//! is stripped from the first token of every interpreted command line.

use std::fmt;
use std::fs;
use std::path::Path;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Interpreted manifest directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    BootDriver,
    CpuDriver,
    Module,
}

impl DirectiveKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "bootdriver" => Some(Self::BootDriver),
            "cpudriver" => Some(Self::CpuDriver),
            "module" => Some(Self::Module),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::BootDriver => "bootdriver",
            Self::CpuDriver => "cpudriver",
            Self::Module => "module",
        }
    }

    /// Render a directive line (`<keyword> <tokens...>`), without a line terminator.
    pub fn render(self, cmdline: &[String]) -> String {
        format!("{} {}", self.keyword(), cmdline.join(" "))
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Errors produced while reading a manifest.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("failed to read manifest '{path}': {source}")]
    #[diagnostic(code(manifest::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest has no `{kind}` directive")]
    #[diagnostic(
        code(manifest::missing_directive),
        help("every manifest needs exactly one `bootdriver` and one `cpudriver` line")
    )]
    MissingDirective {
        kind: DirectiveKind,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("`{kind}` directive is set more than once")]
    #[diagnostic(code(manifest::duplicate_directive))]
    DuplicateDirective {
        kind: DirectiveKind,
        #[source_code]
        src: NamedSource<String>,
        #[label("first set here")]
        first: SourceSpan,
        #[label("set again here")]
        again: SourceSpan,
    },
}

/// One raw manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine {
    /// Line text without its terminator.
    pub text: String,
    /// Whether the parser consumed this line as a `bootdriver`/`cpudriver`/`module` directive.
    pub interpreted: bool,
}

impl ManifestLine {
    /// Directive kind of an interpreted line.
    pub fn directive(&self) -> Option<DirectiveKind> {
        if !self.interpreted {
            return None;
        }
        self.text.split_whitespace().next().and_then(DirectiveKind::from_keyword)
    }
}

/// Parsed boot manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleManifest {
    pub boot_driver: Vec<String>,
    pub cpu_driver: Vec<String>,
    pub modules: Vec<Vec<String>>,
    pub original_lines: Vec<ManifestLine>,
}

/// Read and parse a manifest file.
pub fn parse_manifest(path: &Path) -> Result<ModuleManifest, ManifestError> {
    let source = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    ModuleManifest::parse(&source, &name)
}

impl ModuleManifest {
    /// Parse manifest text. `name` is only used for diagnostics.
    pub fn parse(source: &str, name: &str) -> Result<Self, ManifestError> {
        let mut boot_driver: Option<(Vec<String>, SourceSpan)> = None;
        let mut cpu_driver: Option<(Vec<String>, SourceSpan)> = None;
        let mut modules = Vec::new();
        let mut original_lines = Vec::new();

        let mut offset = 0;
        for chunk in source.split_inclusive('\n') {
            let text = chunk.trim_end_matches(['\n', '\r']);
            let span = SourceSpan::from((offset, text.len()));
            offset += chunk.len();

            let directive = parse_directive(text);
            original_lines.push(ManifestLine {
                text: text.to_string(),
                interpreted: directive.is_some(),
            });

            let Some((kind, cmdline)) = directive else {
                continue;
            };
            let slot = match kind {
                DirectiveKind::Module => {
                    modules.push(cmdline);
                    continue;
                }
                DirectiveKind::BootDriver => &mut boot_driver,
                DirectiveKind::CpuDriver => &mut cpu_driver,
            };
            if let Some((_, first)) = slot {
                return Err(ManifestError::DuplicateDirective {
                    kind,
                    src: NamedSource::new(name, source.to_string()),
                    first: *first,
                    again: span,
                });
            }
            *slot = Some((cmdline, span));
        }

        let missing = |kind| ManifestError::MissingDirective {
            kind,
            src: NamedSource::new(name, source.to_string()),
        };
        let (boot_driver, _) = boot_driver.ok_or_else(|| missing(DirectiveKind::BootDriver))?;
        let (cpu_driver, _) = cpu_driver.ok_or_else(|| missing(DirectiveKind::CpuDriver))?;

        tracing::debug!(
            modules = modules.len(),
            lines = original_lines.len(),
            "parsed manifest '{}'",
            name
        );

        Ok(Self {
            boot_driver,
            cpu_driver,
            modules,
            original_lines,
        })
    }

    /// Lines the parser did not interpret, in file order.
    pub fn passthrough_lines(&self) -> impl Iterator<Item = &str> {
        self.original_lines.iter().filter(|l| !l.interpreted).map(|l| l.text.as_str())
    }

    /// Total number of binaries loaded at boot (boot driver, CPU driver and modules).
    pub fn binary_count(&self) -> usize {
        2 + self.modules.len()
    }

    /// Build targets for this manifest extended with `extra` modules: the first token of each module command line,
    /// base modules first, duplicates dropped.
    pub fn module_binaries(&self, extra: &[Vec<String>]) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for cmdline in self.modules.iter().chain(extra) {
            if let Some(binary) = cmdline.first() {
                if !targets.contains(binary) {
                    targets.push(binary.clone());
                }
            }
        }
        targets
    }
}

/// Strip a single leading `/` from the first token of a command line.
pub fn normalize_cmdline(cmdline: &mut [String]) {
    if let Some(first) = cmdline.first_mut() {
        if let Some(stripped) = first.strip_prefix('/') {
            *first = stripped.to_string();
        }
    }
}

fn parse_directive(line: &str) -> Option<(DirectiveKind, Vec<String>)> {
    let mut words = line.split_whitespace();
    let keyword = words.next()?;
    if keyword.starts_with('#') {
        return None;
    }
    let kind = DirectiveKind::from_keyword(keyword)?;

    let mut cmdline: Vec<String> = words.take_while(|w| !w.starts_with('#')).map(str::to_string).collect();
    if cmdline.is_empty() {
        return None;
    }
    normalize_cmdline(&mut cmdline);
    Some((kind, cmdline))
}
