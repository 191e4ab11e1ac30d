//! Harness-level error type.
//!
//! Each layer keeps its own `thiserror` enum; [`HarnessError`] wraps them so the pipeline can propagate with `?`
//! and the coordinator can decide whether an error ends a single subtest or the whole invocation.

use std::path::PathBuf;

use autograder_descriptors::{ManifestError, SelectorError, SuiteError};
use thiserror::Error;

use crate::backend::build::BuildError;
use crate::backend::remote::RemoteError;
use crate::console::ConsoleError;
use crate::console::boot::BootError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Suite(#[from] SuiteError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("'{}' does not exist, run hake first", .0.display())]
    ConfigurationMissing(PathBuf),

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Boot(#[from] BootError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Console(#[from] ConsoleError),

    #[error("subtest '{subtest}' is not defined in test '{suite}'")]
    UnknownSubtest { suite: String, subtest: String },

    #[error("could not run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    /// Errors that end the whole invocation rather than a single subtest.
    pub fn is_fatal(&self) -> bool {
        match self {
            HarnessError::Manifest(_)
            | HarnessError::Suite(_)
            | HarnessError::Selector(_)
            | HarnessError::ConfigurationMissing(_)
            | HarnessError::UnsupportedConfiguration(_) => true,
            HarnessError::Remote(e) => e.is_connection_failure(),
            _ => false,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }

    /// The build failure behind this error, if any.
    pub fn build_error(&self) -> Option<&BuildError> {
        match self {
            HarnessError::Build(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
