//! Unified subprocess abstraction layer
//!
//! All shell and git invocations go through the [`ProcessRunner`] trait so
//! they can be mocked in tests and uniformly carry timeouts.

mod builder;
mod error;
mod runner;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
