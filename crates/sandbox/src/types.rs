use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use tokio::io::AsyncWrite;

use crate::error::Result;

/// Opaque engine-assigned container identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Engines hand out 64-char hex ids; the short form is enough for logs.
        let short = self.0.get(..12).unwrap_or(&self.0);
        f.write_str(short)
    }
}

/// One demultiplexed frame from an attached container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

/// One resource-usage snapshot. Both counters are as reported by the
/// engine; CPU time is cumulative since container start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSample {
    pub memory_bytes: u64,
    pub cpu_total_ns: u64,
}

pub type OutputStream = BoxStream<'static, Result<OutputChunk>>;
pub type StatsStream = BoxStream<'static, Result<StatsSample>>;

/// Streams obtained by attaching to a created container.
pub struct Attached {
    pub output: OutputStream,
    /// Present only when the attach requested stdin.
    pub input: Option<Pin<Box<dyn AsyncWrite + Send>>>,
}
