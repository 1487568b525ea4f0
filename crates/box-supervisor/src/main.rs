//! Sandbox entry process. Stdout carries exactly one JSON document.

use box_supervisor::report::emit;
use box_supervisor::{Args, Outcome, supervise};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let outcome = match Args::from_env() {
        Ok(args) => supervise(args).await,
        Err(e) => Outcome::StartFailed(e.to_string()),
    };
    emit(&outcome)
}
