//! Autograder backend: everything that talks to the outside world except the console.
//!
//! ## Module Organization
//!
//! - `process.rs` - `CommandRunner` seam over external commands
//! - `build.rs` - hake and `make` orchestration
//! - `image.rs` - composed manifest and image build per subtest
//! - `remote.rs` - SSH connection to the rack host, image install

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod build;
pub mod image;
pub mod process;
pub mod remote;

pub use build::{BuildError, BuildOrchestrator, BuildStage};
pub use image::{ImageComposer, compose};
pub use process::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use remote::{RemoteError, RemoteSpec, SshConnection};
