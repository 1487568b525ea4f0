//! Types and helpers shared by the host runner and the in-sandbox supervisor.
//!
//! - Wire documents exchanged over the sandbox stdout protocol
//! - Source bundle layout
//! - Logging macros for binaries whose stdout is reserved

pub mod bundle;
pub mod log;
pub mod report;

pub use bundle::{BundleError, SourceBundle, SourceFile};
pub use report::{
    ExecutionResult, FailureReport, Metrics, TIME_LIMIT_EXCEEDED, TestOutcome, round_secs,
};
