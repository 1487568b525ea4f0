//! Documents written by the supervisor on the sandbox's stdout.
//!
//! All three shapes (setup failure, timeout, completed run) deserialize into
//! [`ExecutionResult`]; missing fields take their defaults.

use serde::{Deserialize, Serialize};

pub const TIME_LIMIT_EXCEEDED: &str = "time limit exceeded";

/// Outcome of one test case, as reported by the harness itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack_trace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub exit_code: i64,
    /// Seconds, rounded to two decimals.
    pub wall_time: f64,
    /// Nanoseconds of CPU consumed (user + system).
    pub cpu_time: u64,
    /// Peak memory in bytes.
    pub memory: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

/// Round a duration in seconds to two decimals.
pub fn round_secs(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    #[serde(alias = "output")]
    pub tests: Vec<TestOutcome>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl ExecutionResult {
    /// A failed run carrying only a reason.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn timed_out() -> Self {
        Self::failure(TIME_LIMIT_EXCEEDED)
    }

    pub fn is_timeout(&self) -> bool {
        !self.success && self.message == TIME_LIMIT_EXCEEDED
    }
}

/// Minimal document for failures before the target program ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub message: String,
}

impl FailureReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
