mod config;
mod engine;
mod error;
mod types;

pub use config::{ContainerSpec, ResourceEnvelope, ULIMIT_NAMES, mib_to_bytes};
pub use engine::SandboxEngine;
pub use error::{Result, SandboxError};
pub use types::{Attached, ContainerId, OutputChunk, OutputStream, StatsSample, StatsStream};
