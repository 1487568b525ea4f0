//! Admission, build and execution for one submission.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sandbox::SandboxEngine;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use crate::admission::AdmissionGate;
use crate::archive::{tar_binary, tar_sources};
use crate::cache::ToolchainCache;
use crate::config::{Delivery, RunnerConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::orchestrator::{Orchestrator, Payload};
use crate::toolchain::{BuildOutcome, ToolchainContext, ToolchainRegistry};
use crate::types::{Submission, SubmissionResult};

/// Name of a compiled artifact inside the sandbox workspace.
pub const BINARY_NAME: &str = "box";

pub struct SubmissionProcessor {
    gate: AdmissionGate,
    orchestrator: Orchestrator,
    registry: ToolchainRegistry,
    cache: ToolchainCache,
    templates_dir: PathBuf,
    work_dir: PathBuf,
    build_timeout: Duration,
}

impl SubmissionProcessor {
    pub fn new(
        config: &RunnerConfig,
        engine: Arc<dyn SandboxEngine>,
        registry: ToolchainRegistry,
    ) -> RunnerResult<Self> {
        Ok(Self {
            gate: AdmissionGate::new(config.queue_cap)?,
            orchestrator: Orchestrator::new(engine, config.submission_configs.clone()),
            registry,
            cache: ToolchainCache::new(config.clean_interval()),
            templates_dir: config.templates_dir.clone(),
            work_dir: config.work_dir.clone(),
            build_timeout: config.build_timeout(),
        })
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn cache(&self) -> &ToolchainCache {
        &self.cache
    }

    /// Run `submission` to a result.
    ///
    /// Build rejections and time limits are results. Errors carry a status
    /// via [`RunnerError::status_code`]; internal ones are logged here with
    /// the submission id.
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        submission: Submission,
    ) -> RunnerResult<SubmissionResult> {
        let submission_id = uuid::Uuid::new_v4().simple().to_string();
        let submission_id = submission_id.get(..12).unwrap_or(&submission_id);
        let span = info_span!(
            "submission",
            submission_id,
            kind = %submission.kind,
            exercise_id = %submission.exercise_id,
        );

        async {
            let outcome = self.handle(cancel, submission).await;
            match &outcome {
                Ok(result) => info!(success = result.success, "submission processed"),
                Err(e) if e.status_code() == 500 => error!(error = %e, "submission failed"),
                Err(e) => info!(status = e.status_code(), error = %e, "submission rejected"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn handle(
        &self,
        cancel: &CancellationToken,
        submission: Submission,
    ) -> RunnerResult<SubmissionResult> {
        let delivery = self
            .orchestrator
            .config(&submission.kind)
            .map(|c| c.delivery)
            .ok_or_else(|| RunnerError::Unsupported(submission.kind.clone()))?;
        submission.validate()?;

        let _slot = self.gate.acquire(cancel).await?;
        debug!(available = self.gate.available(), "admitted");

        let payload = if self.registry.is_compiled(&submission.kind) {
            match self.build(&submission).await? {
                BuildOutcome::Failed { diagnostics } => {
                    info!("build rejected");
                    return Ok(SubmissionResult::build_failed(diagnostics));
                }
                BuildOutcome::Success { binary } => binary_payload(delivery, binary)?,
            }
        } else {
            source_payload(delivery, &submission)?
        };

        if cancel.is_cancelled() {
            return Err(RunnerError::Canceled);
        }
        let run = self
            .orchestrator
            .execute(cancel, &submission.kind, payload)
            .await?;
        Ok(run.into())
    }

    /// Prep and build on the exercise's cached toolchain, creating it on a miss.
    async fn build(&self, submission: &Submission) -> RunnerResult<BuildOutcome> {
        let key = format!("{}/{}", submission.kind, submission.exercise_id);
        let cached = match self.cache.load(&key) {
            Some(cached) => {
                debug!("toolchain cache hit");
                cached
            }
            None => {
                let ctx = ToolchainContext {
                    exercise_id: submission.exercise_id.clone(),
                    templates_dir: self.templates_dir.clone(),
                    work_dir: self.work_dir.clone(),
                    build_timeout: self.build_timeout,
                };
                let toolchain = self
                    .registry
                    .create(&submission.kind, &ctx)
                    .ok_or_else(|| RunnerError::Unsupported(submission.kind.clone()))??;
                self.cache.add(&key, toolchain)
            }
        };

        let _build = cached.lock_build().await;
        let toolchain = cached.toolchain();
        toolchain.prep(&submission.bundle).await?;
        let outcome = toolchain.build(&submission.bundle).await?;
        Ok(outcome)
    }
}

fn binary_payload(delivery: Delivery, binary: Vec<u8>) -> RunnerResult<Payload> {
    Ok(match delivery {
        Delivery::Workspace => Payload {
            archive: Some(tar_binary(BINARY_NAME, &binary)?),
            stdin: None,
        },
        Delivery::Stdin => Payload {
            archive: None,
            stdin: Some(binary),
        },
    })
}

fn source_payload(delivery: Delivery, submission: &Submission) -> RunnerResult<Payload> {
    Ok(match delivery {
        Delivery::Workspace => Payload {
            archive: Some(tar_sources(&submission.bundle)?),
            stdin: None,
        },
        Delivery::Stdin => Payload {
            archive: None,
            stdin: Some(
                serde_json::to_vec(&submission.bundle)
                    .map_err(|e| RunnerError::Internal(format!("encode bundle: {e}")))?,
            ),
        },
    })
}
