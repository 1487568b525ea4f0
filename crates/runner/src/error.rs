use crate::toolchain::ToolchainError;

/// Non-standard status for a caller that gave up before a result existed.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("unsupported submission type: {0}")]
    Unsupported(String),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("canceled")]
    Canceled,

    #[error("sandbox error: {0}")]
    Sandbox(#[from] sandbox::SandboxError),

    #[error("toolchain error: {0}")]
    Toolchain(#[from] ToolchainError),

    #[error("undecodable sandbox output: {0}")]
    Decode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Status a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unsupported(_)
            | Self::InvalidSubmission(_)
            | Self::Toolchain(ToolchainError::Reserved { .. }) => 400,
            Self::Canceled => STATUS_CLIENT_CLOSED_REQUEST,
            _ => 500,
        }
    }

    /// Message safe to show the submitter. Internal failures are logged,
    /// never echoed.
    pub fn public_message(&self) -> String {
        match self.status_code() {
            500 => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type RunnerResult<T> = Result<T, RunnerError>;
