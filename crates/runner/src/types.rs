use std::path::{Component, Path};

use box_common::{Metrics, SourceBundle, TestOutcome};
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One code package for one exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "id")]
    pub exercise_id: String,
    /// Matched against the loaded submission configs.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub bundle: SourceBundle,
}

impl Submission {
    /// Structural checks that need no configuration.
    pub fn validate(&self) -> RunnerResult<()> {
        if !is_single_component(&self.exercise_id) {
            return Err(RunnerError::InvalidSubmission(format!(
                "invalid exercise id {:?}",
                self.exercise_id
            )));
        }
        self.bundle
            .validate()
            .map_err(|e| RunnerError::InvalidSubmission(e.to_string()))
    }
}

/// The exercise id names a workspace directory, so it must stay one level deep.
fn is_single_component(id: &str) -> bool {
    if id.is_empty() || id.contains('\0') {
        return false;
    }
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub success: bool,
    /// Compiler diagnostics; empty unless the build was rejected.
    pub build: String,
    /// Why the run failed, when it did.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub tests: Vec<TestOutcome>,
    pub metrics: Metrics,
}

impl SubmissionResult {
    pub fn build_failed(diagnostics: impl Into<String>) -> Self {
        Self {
            build: diagnostics.into(),
            ..Self::default()
        }
    }
}

impl From<box_common::ExecutionResult> for SubmissionResult {
    fn from(run: box_common::ExecutionResult) -> Self {
        Self {
            success: run.success,
            build: String::new(),
            message: run.message,
            tests: run.tests,
            metrics: run.metrics.unwrap_or_default(),
        }
    }
}
