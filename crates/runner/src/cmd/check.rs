use std::path::PathBuf;

use clap::Args;
use runner::config;
use runner::toolchain::{ToolchainContext, ToolchainRegistry};
use runner::{RunnerError, RunnerResult};
use tracing::{info, warn};

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the runner YAML config
    #[arg(long, short)]
    config: PathBuf,
}

/// Validate the config, reach the engine and resolve every configured compiler.
pub async fn run_check(args: CheckArgs) -> RunnerResult<()> {
    let config = config::load(&args.config).await?;
    info!(
        queue_cap = config.queue_cap,
        types = config.submission_configs.len(),
        "config valid"
    );

    super::connect_engine(&config).await?;

    let registry = ToolchainRegistry::with_defaults();
    let mut missing = Vec::new();
    for submission in &config.submission_configs {
        let ctx = ToolchainContext {
            exercise_id: "check".to_string(),
            templates_dir: config.templates_dir.clone(),
            work_dir: config.work_dir.clone(),
            build_timeout: config.build_timeout(),
        };
        match registry.create(&submission.id, &ctx) {
            None => info!(kind = %submission.id, image = %submission.container_image, "interpreted"),
            Some(Ok(toolchain)) => {
                info!(kind = %submission.id, language = toolchain.language(), "compiler found");
            }
            Some(Err(e)) => {
                warn!(kind = %submission.id, error = %e, "toolchain unavailable");
                missing.push(submission.id.clone());
            }
        }
    }

    if !missing.is_empty() {
        return Err(RunnerError::Config(format!(
            "toolchains unavailable for: {}",
            missing.join(", ")
        )));
    }
    info!("all checks passed");
    Ok(())
}
