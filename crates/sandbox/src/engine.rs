use async_trait::async_trait;

use crate::config::ContainerSpec;
use crate::error::Result;
use crate::types::{Attached, ContainerId, StatsStream};

/// Narrow capability boundary over a container engine.
///
/// Implementations must be safe to share across concurrent submissions;
/// every call addresses exactly one container.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Human-readable name for this engine (e.g. "docker").
    fn name(&self) -> &str;
    /// Verify the engine is reachable. Called once at startup.
    async fn check(&self) -> Result<()>;

    // -- lifecycle --
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId>;
    async fn start(&self, id: &ContainerId) -> Result<()>;
    /// Block until the container leaves the running state; returns its exit code.
    async fn wait(&self, id: &ContainerId) -> Result<i64>;
    async fn kill(&self, id: &ContainerId) -> Result<()>;
    /// Force-remove, whether running or not.
    async fn remove(&self, id: &ContainerId) -> Result<()>;

    // -- io --
    /// Extract an uncompressed tar archive into `dest` inside the container.
    async fn copy_archive(&self, id: &ContainerId, dest: &str, archive: Vec<u8>) -> Result<()>;
    async fn attach(&self, id: &ContainerId, stdin: bool) -> Result<Attached>;
    async fn stats(&self, id: &ContainerId) -> Result<StatsStream>;
}
