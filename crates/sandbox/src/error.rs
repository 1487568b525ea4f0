#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("container creation failed: {0}")]
    CreationFailed(String),

    #[error("container start failed: {0}")]
    StartFailed(String),

    #[error("archive upload failed: {0}")]
    CopyFailed(String),

    #[error("attach failed: {0}")]
    AttachFailed(String),

    #[error("wait failed: {0}")]
    WaitFailed(String),

    #[error("stats stream failed: {0}")]
    StatsFailed(String),

    #[error("kill failed: {0}")]
    KillFailed(String),

    #[error("remove failed: {0}")]
    RemoveFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
