mod cmd;

use std::fmt;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

/// Log timestamps as seconds since startup.
struct Uptime(Instant);

impl FormatTime for Uptime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        write!(w, "{:>5}.{:03}s", d.as_secs(), d.subsec_millis())
    }
}

#[derive(Parser)]
#[command(name = "runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the config, ping the container engine and resolve compilers
    Check(cmd::CheckArgs),
    /// Process one submission and print the result as JSON
    Run(cmd::RunArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Results go to stdout; logs stay on stderr.
    tracing_subscriber::fmt()
        .with_timer(Uptime(Instant::now()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Check(args) => cmd::run_check(args).await.map(|()| ExitCode::SUCCESS),
        Command::Run(args) => cmd::run_submission(args).await,
    };

    result.unwrap_or_else(|e| {
        error!(error = %e, "runner failed");
        ExitCode::FAILURE
    })
}
