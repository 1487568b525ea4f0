//! Execution supervisor: the entry process inside the sandbox.
//!
//! Stages the payload, runs the target under a wall-clock deadline, and
//! reduces the run to exactly one JSON document on stdout.

pub mod cli;
pub mod error;
pub mod exec;
pub mod report;
pub mod stage;

use std::time::Instant;

use box_common::{log_error, log_info};

pub use cli::Args;
pub use error::SetupError;
pub use report::Outcome;

const LOG_TAG: &str = box_common::log::SUPERVISOR_TAG;

/// Lifecycle phases before a terminal [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Staging,
    Running,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Staging => "staging",
            Self::Running => "running",
        })
    }
}

/// Drive one run to a terminal outcome. Never fails: every setup error is
/// folded into [`Outcome::StartFailed`].
pub async fn supervise(args: Args) -> Outcome {
    let mut phase = Phase::Init;
    match run(args, &mut phase).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log_error!(LOG_TAG, "{phase} failed: {e}");
            Outcome::StartFailed(e.to_string())
        }
    }
}

async fn run(args: Args, phase: &mut Phase) -> Result<Outcome, SetupError> {
    let timeout = cli::parse_timeout(args.timeout.as_deref())?;

    *phase = Phase::Staging;
    let plan = stage::prepare(&args).await?;
    log_info!(LOG_TAG, "staged {} ({} bytes)", plan.program.display(), plan.staged_bytes);

    *phase = Phase::Running;
    let started = Instant::now();
    let finished = exec::run(&plan, timeout).await?;
    let wall = started.elapsed();

    Ok(match finished {
        exec::Finished::TimedOut => {
            log_info!(LOG_TAG, "deadline of {}s elapsed", timeout.as_secs_f64());
            Outcome::TimedOut
        }
        exec::Finished::Exited(run) => {
            log_info!(LOG_TAG, "child exited: {:?}", run.exit);
            Outcome::Completed(report::assemble(run, wall))
        }
    })
}
