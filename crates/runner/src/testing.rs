//! In-memory `SandboxEngine` for orchestrator and processor tests.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use sandbox::{
    Attached, ContainerId, ContainerSpec, OutputChunk, Result, SandboxEngine, SandboxError,
    StatsSample, StatsStream,
};
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{Delivery, SubmissionConfig};

/// A submission config with a small envelope and a 5 second timeout.
pub fn submission_config(id: &str, delivery: Delivery) -> SubmissionConfig {
    SubmissionConfig {
        id: id.into(),
        container_image: format!("box-{id}:latest"),
        cmd: vec![],
        cpu_shares: Some(512),
        cpu_period: None,
        cpu_quota: None,
        max_memory: 256,
        max_swap: 256,
        max_pids: Some(64),
        timeout: 5,
        ulimits: Default::default(),
        delivery,
    }
}

/// What every container created by the fake does once started.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub exit_code: i64,
    pub run_for: Duration,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stats: Vec<StatsSample>,
    pub fail_create: bool,
    pub fail_start: bool,
}

impl Script {
    pub fn printing(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Container {
    stdin: Arc<Mutex<Vec<u8>>>,
    output: Option<mpsc::UnboundedSender<OutputChunk>>,
    kill: CancellationToken,
    exit: Option<watch::Receiver<Option<i64>>>,
}

#[derive(Default)]
pub struct FakeEngine {
    script: Script,
    containers: Mutex<HashMap<ContainerId, Container>>,
    /// Removal count per container ever created.
    removals: Mutex<HashMap<ContainerId, usize>>,
    specs: Mutex<Vec<ContainerSpec>>,
    archives: Mutex<Vec<(String, Vec<u8>)>>,
    stdins: Mutex<Vec<Arc<Mutex<Vec<u8>>>>>,
    next_id: AtomicU64,
    kills: AtomicUsize,
    running: Arc<AtomicUsize>,
    max_running: AtomicUsize,
}

impl FakeEngine {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Self::default()
        })
    }

    pub fn created(&self) -> usize {
        self.removals.lock().unwrap().len()
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().unwrap().clone()
    }

    /// True when every container created so far was removed exactly once.
    pub fn all_removed_once(&self) -> bool {
        self.removals.lock().unwrap().values().all(|n| *n == 1)
    }

    pub fn removal_counts(&self) -> Vec<usize> {
        self.removals.lock().unwrap().values().copied().collect()
    }

    /// Last archive uploaded, with its destination.
    pub fn last_archive(&self) -> Option<(String, Vec<u8>)> {
        self.archives.lock().unwrap().last().cloned()
    }

    /// Bytes received on the last attached stdin.
    pub fn last_stdin(&self) -> Option<Vec<u8>> {
        let stdins = self.stdins.lock().unwrap();
        stdins.last().map(|s| s.lock().unwrap().clone())
    }

    fn with<T>(&self, id: &ContainerId, f: impl FnOnce(&mut Container) -> T) -> Result<T> {
        let mut containers = self.containers.lock().unwrap();
        let c = containers
            .get_mut(id)
            .ok_or_else(|| SandboxError::InvalidConfig(format!("no such container: {id}")))?;
        Ok(f(c))
    }
}

#[async_trait]
impl SandboxEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn check(&self) -> Result<()> {
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        if self.script.fail_create {
            return Err(SandboxError::CreationFailed("image not found".into()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = ContainerId::new(format!("fake-{n}"));
        self.containers.lock().unwrap().insert(
            id.clone(),
            Container::default(),
        );
        self.removals.lock().unwrap().insert(id.clone(), 0);
        self.specs.lock().unwrap().push(spec.clone());
        Ok(id)
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        let script = self.script.clone();
        if script.fail_start {
            return Err(SandboxError::StartFailed("oci runtime error".into()));
        }
        let (tx, rx) = watch::channel(None);
        let (kill, output) = self.with(id, |c| {
            c.exit = Some(rx);
            (c.kill.clone(), c.output.take())
        })?;

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let running = self.running.clone();
        tokio::spawn(async move {
            let code = tokio::select! {
                _ = kill.cancelled() => 137,
                _ = tokio::time::sleep(script.run_for) => {
                    if let Some(out) = &output {
                        if !script.stdout.is_empty() {
                            let _ = out.send(OutputChunk::Stdout(Bytes::from(script.stdout.clone())));
                        }
                        if !script.stderr.is_empty() {
                            let _ = out.send(OutputChunk::Stderr(Bytes::from(script.stderr.clone())));
                        }
                    }
                    script.exit_code
                }
            };
            drop(output);
            running.fetch_sub(1, Ordering::SeqCst);
            let _ = tx.send(Some(code));
        });
        Ok(())
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64> {
        let mut rx = self
            .with(id, |c| c.exit.clone())?
            .ok_or_else(|| SandboxError::WaitFailed("container not started".into()))?;
        let code = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|e| SandboxError::WaitFailed(e.to_string()))?
            .unwrap_or(-1);
        Ok(code)
    }

    async fn kill(&self, id: &ContainerId) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.with(id, |c| c.kill.cancel())
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let removed = self.containers.lock().unwrap().remove(id);
        *self
            .removals
            .lock()
            .unwrap()
            .entry(id.clone())
            .or_insert(0) += 1;
        let container =
            removed.ok_or_else(|| SandboxError::RemoveFailed(format!("no such container: {id}")))?;
        container.kill.cancel();
        Ok(())
    }

    async fn copy_archive(&self, id: &ContainerId, dest: &str, archive: Vec<u8>) -> Result<()> {
        self.with(id, |_| ())?;
        self.archives
            .lock()
            .unwrap()
            .push((dest.to_string(), archive));
        Ok(())
    }

    async fn attach(&self, id: &ContainerId, stdin: bool) -> Result<Attached> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = self.with(id, |c| {
            c.output = Some(tx);
            c.stdin.clone()
        })?;

        let output = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        })
        .boxed();

        let input = if stdin {
            self.stdins.lock().unwrap().push(sink.clone());
            let (writer, mut reader) = tokio::io::duplex(64 * 1024);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = reader.read_to_end(&mut buf).await;
                sink.lock().unwrap().extend_from_slice(&buf);
            });
            Some(Box::pin(writer) as Pin<Box<dyn AsyncWrite + Send>>)
        } else {
            None
        };

        Ok(Attached { output, input })
    }

    async fn stats(&self, _id: &ContainerId) -> Result<StatsStream> {
        let samples = self.script.stats.clone();
        Ok(stream::iter(samples.into_iter().map(Ok))
            .chain(stream::pending())
            .boxed())
    }
}
