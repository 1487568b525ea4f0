use std::path::PathBuf;
use std::time::Duration;

/// Failures of the build tooling itself. A program that does not compile
/// is not an error; see [`super::BuildOutcome::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("compiler not installed: {program}: {source}")]
    NotInstalled {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("template not found: {}", path.display())]
    MissingTemplate { path: PathBuf },

    #[error("filename is reserved by the build template: {}", path.display())]
    Reserved { path: PathBuf },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} stopped working (signal {signal})")]
    Crashed {
        program: String,
        signal: String,
        diagnostics: String,
    },

    #[error("{program} did not finish within {}s", after.as_secs())]
    TimedOut { program: String, after: Duration },

    #[error("read compiled artifact {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
