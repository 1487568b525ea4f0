mod check;
mod run;

pub use check::{CheckArgs, run_check};
pub use run::{RunArgs, run_submission};

use std::sync::Arc;

use runner::RunnerResult;
use runner::config::RunnerConfig;
use sandbox::SandboxEngine;
use sandbox_docker::{DockerConfig, DockerEngine};
use tracing::info;

/// Connect to the local engine and make sure it answers.
async fn connect_engine(config: &RunnerConfig) -> RunnerResult<Arc<dyn SandboxEngine>> {
    let engine = DockerEngine::connect(DockerConfig {
        runtime: config.runtime.clone(),
    })?;
    engine.check().await?;
    info!(engine = engine.name(), runtime = ?config.runtime, "container engine reachable");
    Ok(Arc::new(engine))
}
