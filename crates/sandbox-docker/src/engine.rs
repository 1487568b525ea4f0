use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, CreateContainerOptions, KillContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StatsOptions, UploadToContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use futures_util::{StreamExt, TryStreamExt};
use sandbox::{
    Attached, ContainerId, ContainerSpec, OutputChunk, Result, SandboxEngine, SandboxError,
    StatsSample, StatsStream,
};
use tracing::{debug, info};

use crate::config::DockerConfig;
use crate::host::container_config;

/// Production engine talking to the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
    config: DockerConfig,
}

impl DockerEngine {
    /// Connect using the platform default socket. Does not contact the
    /// daemon; call [`SandboxEngine::check`] for that.
    pub fn connect(config: DockerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::BackendNotAvailable(format!("docker client: {e}")))?;
        Ok(Self { docker, config })
    }
}

#[async_trait]
impl SandboxEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn check(&self) -> Result<()> {
        let reply = self
            .docker
            .ping()
            .await
            .map_err(|e| SandboxError::BackendNotAvailable(format!("docker ping: {e}")))?;
        info!(reply = %reply, runtime = ?self.config.runtime, "docker engine reachable");
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let body = container_config(spec, &self.config);
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, body)
            .await
            .map_err(|e| SandboxError::CreationFailed(e.to_string()))?;
        for warning in &created.warnings {
            debug!(container_id = %created.id, warning = %warning, "create warning");
        }
        Ok(ContainerId::new(created.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::StartFailed(e.to_string()))
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id.as_str(), Some(options));
        match stream.next().await {
            Some(result) => exit_code(result),
            None => Err(SandboxError::WaitFailed("wait stream ended early".into())),
        }
    }

    async fn kill(&self, id: &ContainerId) -> Result<()> {
        let options = KillContainerOptions { signal: "SIGKILL" };
        match self.docker.kill_container(id.as_str(), Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(DockerError::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(SandboxError::KillFailed(e.to_string())),
        }
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(|e| SandboxError::RemoveFailed(e.to_string()))
    }

    async fn copy_archive(&self, id: &ContainerId, dest: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dest.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id.as_str(), Some(options), archive.into())
            .await
            .map_err(|e| SandboxError::CopyFailed(e.to_string()))
    }

    async fn attach(&self, id: &ContainerId, stdin: bool) -> Result<Attached> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(stdin),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let attached = self
            .docker
            .attach_container(id.as_str(), Some(options))
            .await
            .map_err(|e| SandboxError::AttachFailed(e.to_string()))?;

        let output = attached
            .output
            .map_err(|e| SandboxError::AttachFailed(e.to_string()))
            .try_filter_map(|frame| async move {
                Ok(match frame {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        Some(OutputChunk::Stdout(message))
                    }
                    LogOutput::StdErr { message } => Some(OutputChunk::Stderr(message)),
                    LogOutput::StdIn { .. } => None,
                })
            })
            .boxed();

        Ok(Attached {
            output,
            input: stdin.then_some(attached.input),
        })
    }

    async fn stats(&self, id: &ContainerId) -> Result<StatsStream> {
        let options = StatsOptions {
            stream: true,
            one_shot: false,
        };
        let stream = self
            .docker
            .stats(id.as_str(), Some(options))
            .map(|item| {
                item.map(|s| StatsSample {
                    memory_bytes: s.memory_stats.usage.unwrap_or(0),
                    cpu_total_ns: s.cpu_stats.cpu_usage.total_usage,
                })
                .map_err(|e| SandboxError::StatsFailed(e.to_string()))
            })
            .boxed();
        Ok(stream)
    }
}

/// The daemon reports a non-zero exit as a wait error carrying the code.
fn exit_code(
    result: std::result::Result<bollard::models::ContainerWaitResponse, DockerError>,
) -> Result<i64> {
    match result {
        Ok(response) => Ok(response.status_code),
        Err(DockerError::DockerContainerWaitError { code, .. }) => Ok(code),
        Err(e) => Err(SandboxError::WaitFailed(e.to_string())),
    }
}
