use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Args;
use runner::config;
use runner::toolchain::ToolchainRegistry;
use runner::{RunnerError, RunnerResult, Submission, SubmissionProcessor};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args)]
pub struct RunArgs {
    /// Path to the runner YAML config
    #[arg(long, short)]
    config: PathBuf,
    /// Submission JSON file, or `-` for stdin
    #[arg(long, short, default_value = "-")]
    submission: PathBuf,
}

/// Process one submission and print its result (or error) as JSON on stdout.
///
/// The exit code is non-zero only when no result could be produced.
pub async fn run_submission(args: RunArgs) -> RunnerResult<ExitCode> {
    let config = config::load(&args.config).await?;
    let submission = read_submission(&args.submission).await?;

    let engine = super::connect_engine(&config).await?;
    let processor =
        SubmissionProcessor::new(&config, engine, ToolchainRegistry::with_defaults())?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT, canceling");
            interrupt.cancel();
        }
    });

    let outcome = processor.process(&cancel, submission).await;

    processor.orchestrator().drain().await;
    processor.cache().clear().await;

    let (document, code) = match outcome {
        Ok(result) => (
            serde_json::to_string(&result)
                .map_err(|e| RunnerError::Internal(format!("encode result: {e}")))?,
            ExitCode::SUCCESS,
        ),
        Err(e) => (
            json!({ "status": e.status_code(), "error": e.public_message() }).to_string(),
            ExitCode::FAILURE,
        ),
    };
    println!("{document}");
    Ok(code)
}

async fn read_submission(path: &Path) -> RunnerResult<Submission> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        buf
    } else {
        tokio::fs::read(path).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "cannot read submission");
            RunnerError::InvalidSubmission(format!("read {}: {e}", path.display()))
        })?
    };
    serde_json::from_slice(&raw)
        .map_err(|e| RunnerError::InvalidSubmission(format!("decode submission: {e}")))
}
