/// Failures before or while starting the target. Each one becomes a
/// message-only document.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("invalid arguments: {0}")]
    Args(String),

    #[error("TIMEOUT is not set")]
    MissingTimeout,

    #[error("invalid TIMEOUT {0:?}: expected a positive number of seconds")]
    InvalidTimeout(String),

    #[error("no program to run")]
    NoProgram,

    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("empty payload on stdin")]
    EmptyPayload,

    #[error("read stdin: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("decode source bundle: {0}")]
    Bundle(String),

    #[error("stage {path}: {source}")]
    Stage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wait for child: {0}")]
    Wait(#[source] std::io::Error),
}
