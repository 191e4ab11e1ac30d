//! Descriptor frontend for the autograder: boot manifest, test suites, selectors.
//!
//! This crate is IO-light and intended for reuse by the engine, the fuzzer and any future tooling that needs to
//! read `menu.lst` manifests or suite descriptors without pulling in the build/boot machinery.
//!
//! ## Notes
//! - This crate only *describes* a run: it never spawns processes or touches a console.
//! - Manifest errors are `miette` diagnostics so the CLI can point at the offending line.
//!
//! ## Examples
//! ```rust
//! use autograder_descriptors::manifest::ModuleManifest;
//!
//! let manifest = ModuleManifest::parse(
//!     "bootdriver /armv8/sbin/boot_imx8x\ncpudriver /armv8/sbin/cpu_imx8x\nmodule /armv8/sbin/init\n",
//!     "menu.lst",
//! )
//! .unwrap();
//! assert_eq!(manifest.modules, vec![vec!["armv8/sbin/init".to_string()]]);
//! ```

pub mod manifest;
pub mod selector;
pub mod suite;

pub use manifest::{DirectiveKind, ManifestError, ManifestLine, ModuleManifest, parse_manifest};
pub use selector::{Selector, SelectorError, SubtestSelection};
pub use suite::{Subtest, SuiteError, TestStep, TestSuite, load_suite};
