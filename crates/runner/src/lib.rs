//! Host side of the sandbox: admission, toolchains, container orchestration.

pub mod admission;
pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod sanitize;
pub mod telemetry;
pub mod toolchain;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{RunnerError, RunnerResult};
pub use processor::SubmissionProcessor;
pub use types::{Submission, SubmissionResult};
