//! Container lifecycle for one submission: create, feed, run against the
//! deadline, interpret, remove.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use box_common::{ExecutionResult, Metrics, log, round_secs};
use futures_util::StreamExt;
use sandbox::{ContainerId, ContainerSpec, OutputChunk, OutputStream, SandboxEngine};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::{AbortOnDropHandle, TaskTracker};
use tracing::{debug, info, warn};

use crate::config::{Delivery, SubmissionConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::sanitize::sanitize;
use crate::telemetry::{self, ResourceUsage, SamplerReport};

/// Where workspace payloads are extracted and the entry process starts.
pub const WORKDIR: &str = "/workspace";
const HOSTNAME: &str = "box";
/// How long a killed container gets to report that it stopped.
const KILL_GRACE: Duration = Duration::from_secs(5);
/// How long the output stream may stay open after the exit status is known.
const OUTPUT_DRAIN: Duration = Duration::from_secs(5);
const CAPTURE_LIMIT: usize = 8 * 1024 * 1024;

/// What reaches the sandbox besides its image.
#[derive(Debug, Default)]
pub struct Payload {
    /// Tar archive extracted into [`WORKDIR`] before start.
    pub archive: Option<Vec<u8>>,
    /// Bytes written to stdin after start, then EOF.
    pub stdin: Option<Vec<u8>>,
}

/// One created container. Not `Clone`: removal consumes it.
#[derive(Debug)]
pub struct ContainerHandle {
    id: ContainerId,
    timeout: Duration,
}

impl ContainerHandle {
    pub fn id(&self) -> &ContainerId {
        &self.id
    }
}

pub struct Orchestrator {
    engine: Arc<dyn SandboxEngine>,
    configs: HashMap<String, SubmissionConfig>,
    cleanup: TaskTracker,
}

enum Ending {
    Exited(i64),
    TimedOut,
    Canceled,
    Failed(sandbox::SandboxError),
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    failure: Option<String>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn SandboxEngine>, configs: Vec<SubmissionConfig>) -> Self {
        let configs = configs.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            engine,
            configs,
            cleanup: TaskTracker::new(),
        }
    }

    pub fn is_supported(&self, kind: &str) -> bool {
        self.configs.contains_key(kind)
    }

    pub fn config(&self, kind: &str) -> Option<&SubmissionConfig> {
        self.configs.get(kind)
    }

    /// Allocate a container for `kind` with its configured envelope. Nothing runs yet.
    pub async fn create(&self, kind: &str) -> RunnerResult<ContainerHandle> {
        let config = self
            .config(kind)
            .ok_or_else(|| RunnerError::Unsupported(kind.to_string()))?;
        let id = self.engine.create(&container_spec(config)).await?;
        info!(container_id = %id, kind, image = %config.container_image, "container created");
        Ok(ContainerHandle {
            id,
            timeout: config.timeout(),
        })
    }

    /// Deliver `payload`, start the container and wait for exit, the deadline
    /// or `cancel`, whichever comes first.
    ///
    /// A deadline is a normal result carrying "time limit exceeded"; a
    /// cancellation is [`RunnerError::Canceled`]. Either way the container is
    /// killed before this returns.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        payload: Payload,
    ) -> RunnerResult<ExecutionResult> {
        let id = &handle.id;
        if let Some(archive) = payload.archive {
            debug!(container_id = %id, bytes = archive.len(), "uploading workspace");
            self.engine.copy_archive(id, WORKDIR, archive).await?;
        }

        let attached = self.engine.attach(id, payload.stdin.is_some()).await?;
        let collector = AbortOnDropHandle::new(tokio::spawn(collect(attached.output)));

        self.engine.start(id).await?;
        let started = Instant::now();
        let deadline = started + handle.timeout;
        debug!(container_id = %id, "container started");

        let _feeder = match (attached.input, payload.stdin) {
            (Some(input), Some(bytes)) => Some(AbortOnDropHandle::new(tokio::spawn(feed(
                id.clone(),
                input,
                bytes,
            )))),
            (None, Some(_)) => {
                return Err(RunnerError::Internal(
                    "engine attached without a stdin stream".to_string(),
                ));
            }
            _ => None,
        };

        let sampler_stop = CancellationToken::new();
        let sampler = match self.engine.stats(id).await {
            Ok(stream) => Some(AbortOnDropHandle::new(telemetry::spawn(
                stream,
                sampler_stop.clone(),
            ))),
            Err(e) => {
                warn!(container_id = %id, error = %e, "stats unavailable, host metrics will be empty");
                None
            }
        };

        let ending = tokio::select! {
            biased;
            _ = sleep_until(deadline) => Ending::TimedOut,
            _ = cancel.cancelled() => Ending::Canceled,
            exit = self.engine.wait(id) => match exit {
                // An exit observed past the deadline still lost the race.
                Ok(_) if Instant::now() >= deadline => Ending::TimedOut,
                Ok(code) => Ending::Exited(code),
                Err(e) => Ending::Failed(e),
            },
        };
        let wall = started.elapsed();

        let confirmed = match ending {
            Ending::Exited(_) => None,
            _ => self.stop(id).await,
        };
        sampler_stop.cancel();
        let usage = join_sampler(id, sampler).await;

        match ending {
            Ending::Canceled => {
                info!(container_id = %id, "canceled while running");
                Err(RunnerError::Canceled)
            }
            Ending::Failed(e) => Err(e.into()),
            Ending::TimedOut => {
                info!(
                    container_id = %id,
                    timeout_secs = handle.timeout.as_secs(),
                    "time limit exceeded"
                );
                Ok(ExecutionResult {
                    metrics: Some(host_metrics(confirmed.unwrap_or(-1), wall, usage)),
                    ..ExecutionResult::timed_out()
                })
            }
            Ending::Exited(code) => {
                let captured = match timeout(OUTPUT_DRAIN, collector).await {
                    Ok(Ok(captured)) => captured,
                    Ok(Err(e)) => {
                        return Err(RunnerError::Internal(format!("output collector failed: {e}")));
                    }
                    Err(_) => {
                        return Err(RunnerError::Internal(
                            "output stream stayed open after exit".to_string(),
                        ));
                    }
                };
                if let Some(failure) = &captured.failure {
                    warn!(container_id = %id, error = %failure, "output stream ended early");
                }
                info!(container_id = %id, exit_code = code, wall_secs = wall.as_secs_f64(), "container exited");
                interpret(code, wall, usage, &captured)
            }
        }
    }

    pub async fn kill(&self, handle: &ContainerHandle) -> RunnerResult<()> {
        self.engine.kill(&handle.id).await?;
        Ok(())
    }

    /// Force-remove the container. Consumes the handle so it cannot be removed twice.
    pub async fn remove(&self, handle: ContainerHandle) -> RunnerResult<()> {
        self.engine.remove(&handle.id).await?;
        debug!(container_id = %handle.id, "container removed");
        Ok(())
    }

    /// Remove in the background; failures are logged only. See [`Self::drain`].
    pub fn remove_detached(&self, handle: ContainerHandle) {
        let engine = self.engine.clone();
        self.cleanup.spawn(async move {
            match engine.remove(&handle.id).await {
                Ok(()) => debug!(container_id = %handle.id, "container removed"),
                Err(e) => warn!(container_id = %handle.id, error = %e, "background removal failed"),
            }
        });
    }

    /// Create, run and remove exactly once: in the background after a result,
    /// before returning after an error.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        kind: &str,
        payload: Payload,
    ) -> RunnerResult<ExecutionResult> {
        let handle = self.create(kind).await?;
        let outcome = self.run(cancel, &handle, payload).await;
        match &outcome {
            Ok(_) => self.remove_detached(handle),
            Err(_) => {
                let id = handle.id.clone();
                if let Err(e) = self.remove(handle).await {
                    warn!(container_id = %id, error = %e, "container removal failed");
                }
            }
        }
        outcome
    }

    /// Wait for every background removal spawned so far.
    pub async fn drain(&self) {
        self.cleanup.close();
        self.cleanup.wait().await;
        self.cleanup.reopen();
    }

    /// Kill and wait (bounded) for the container to stop.
    async fn stop(&self, id: &ContainerId) -> Option<i64> {
        if let Err(e) = self.engine.kill(id).await {
            warn!(container_id = %id, error = %e, "kill failed");
        }
        match timeout(KILL_GRACE, self.engine.wait(id)).await {
            Ok(Ok(code)) => Some(code),
            Ok(Err(e)) => {
                warn!(container_id = %id, error = %e, "wait after kill failed");
                None
            }
            Err(_) => {
                warn!(container_id = %id, "container still running after kill");
                None
            }
        }
    }
}

fn container_spec(config: &SubmissionConfig) -> ContainerSpec {
    ContainerSpec {
        image: config.container_image.clone(),
        hostname: HOSTNAME.to_string(),
        working_dir: WORKDIR.to_string(),
        cmd: config.cmd.clone(),
        env: vec![format!("TIMEOUT={}", config.timeout)],
        open_stdin: config.delivery == Delivery::Stdin,
        resources: config.resources(),
    }
}

async fn collect(mut output: OutputStream) -> Captured {
    let mut captured = Captured::default();
    while let Some(chunk) = output.next().await {
        match chunk {
            Ok(OutputChunk::Stdout(bytes)) => append(&mut captured.stdout, &bytes),
            Ok(OutputChunk::Stderr(bytes)) => append(&mut captured.stderr, &bytes),
            Err(e) => {
                captured.failure = Some(e.to_string());
                break;
            }
        }
    }
    captured
}

fn append(buf: &mut Vec<u8>, bytes: &[u8]) {
    let room = CAPTURE_LIMIT.saturating_sub(buf.len());
    buf.extend(bytes.iter().take(room));
}

async fn feed(id: ContainerId, mut input: Pin<Box<dyn AsyncWrite + Send>>, bytes: Vec<u8>) {
    let written = async {
        input.write_all(&bytes).await?;
        input.shutdown().await
    };
    match written.await {
        Ok(()) => debug!(container_id = %id, bytes = bytes.len(), "stdin payload delivered"),
        Err(e) => warn!(container_id = %id, error = %e, "stdin payload not fully delivered"),
    }
}

async fn join_sampler(
    id: &ContainerId,
    sampler: Option<AbortOnDropHandle<SamplerReport>>,
) -> ResourceUsage {
    let Some(sampler) = sampler else {
        return ResourceUsage::default();
    };
    match sampler.await {
        Ok(SamplerReport { usage, failure }) => {
            if let Some(e) = failure {
                warn!(container_id = %id, error = %e, "stats stream failed");
            }
            usage
        }
        Err(e) => {
            warn!(container_id = %id, error = %e, "sampler task failed");
            ResourceUsage::default()
        }
    }
}

fn host_metrics(exit_code: i64, wall: Duration, usage: ResourceUsage) -> Metrics {
    Metrics {
        exit_code,
        wall_time: round_secs(wall.as_secs_f64()),
        cpu_time: usage.cpu_time_ns,
        memory: usage.peak_memory_bytes,
        ..Metrics::default()
    }
}

/// Turn a finished container into a result. A zero exit must carry a
/// decodable document on stdout.
fn interpret(
    code: i64,
    wall: Duration,
    usage: ResourceUsage,
    captured: &Captured,
) -> RunnerResult<ExecutionResult> {
    let host = host_metrics(code, wall, usage);
    if code != 0 {
        let stderr = sanitize(&captured.stderr);
        let mut reason = Vec::new();
        for line in stderr.lines() {
            if log::is_tagged(line, log::SUPERVISOR_TAG) {
                debug!(line, "supervisor log");
            } else {
                reason.push(line);
            }
        }
        let message = match reason.join("\n").trim() {
            "" => format!("exited with code {code}"),
            reason => reason.to_string(),
        };
        return Ok(ExecutionResult {
            message,
            metrics: Some(host),
            ..ExecutionResult::default()
        });
    }

    let mut result = decode(&sanitize(&captured.stdout))?;
    result.metrics = Some(merge_metrics(result.metrics.take(), host, usage.samples > 0));
    Ok(result)
}

/// The whole document, or failing that its last non-empty line.
fn decode(document: &str) -> RunnerResult<ExecutionResult> {
    let trimmed = document.trim();
    serde_json::from_str(trimmed).or_else(|whole| {
        trimmed
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| RunnerError::Decode(whole.to_string()))
    })
}

/// Wall time is always the host's. CPU and memory come from the engine when
/// it produced samples, otherwise from the sandbox's own report.
fn merge_metrics(reported: Option<Metrics>, host: Metrics, sampled: bool) -> Metrics {
    let Some(reported) = reported else {
        return host;
    };
    let (cpu_time, memory) = if sampled {
        (host.cpu_time, host.memory)
    } else {
        (reported.cpu_time, reported.memory)
    };
    Metrics {
        wall_time: host.wall_time,
        cpu_time,
        memory,
        ..reported
    }
}
