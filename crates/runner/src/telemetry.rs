//! Resource sampling for one running container.

use futures_util::StreamExt;
use sandbox::{StatsSample, StatsStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Reduction of a stats series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Latest cumulative CPU counter seen.
    pub cpu_time_ns: u64,
    pub peak_memory_bytes: u64,
    pub samples: u64,
}

impl ResourceUsage {
    fn observe(&mut self, sample: StatsSample) {
        self.samples += 1;
        self.peak_memory_bytes = self.peak_memory_bytes.max(sample.memory_bytes);
        // The engine emits a zeroed snapshot once the container is gone;
        // the counter is cumulative, so zero never supersedes a real reading.
        if sample.cpu_total_ns > 0 {
            self.cpu_time_ns = sample.cpu_total_ns;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerReport {
    pub usage: ResourceUsage,
    /// Set when the stream failed; `usage` holds what was seen before.
    pub failure: Option<String>,
}

/// Consume `stream` on its own task until it ends, fails, or `cancel` fires.
pub fn spawn(stream: StatsStream, cancel: CancellationToken) -> JoinHandle<SamplerReport> {
    tokio::spawn(sample(stream, cancel))
}

async fn sample(mut stream: StatsStream, cancel: CancellationToken) -> SamplerReport {
    let mut usage = ResourceUsage::default();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(s)) => usage.observe(s),
                Some(Err(e)) => {
                    return SamplerReport {
                        usage,
                        failure: Some(e.to_string()),
                    };
                }
                None => break,
            },
        }
    }
    SamplerReport {
        usage,
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;
    use sandbox::SandboxError;

    use super::*;

    fn s(memory_bytes: u64, cpu_total_ns: u64) -> sandbox::Result<StatsSample> {
        Ok(StatsSample {
            memory_bytes,
            cpu_total_ns,
        })
    }

    #[tokio::test]
    async fn peak_memory_and_last_cpu() {
        let samples = vec![s(10, 100), s(50, 250), s(30, 400)];
        let report = spawn(stream::iter(samples).boxed(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.failure, None);
        assert_eq!(report.usage.peak_memory_bytes, 50);
        assert_eq!(report.usage.cpu_time_ns, 400);
        assert_eq!(report.usage.samples, 3);
    }

    #[tokio::test]
    async fn trailing_zero_sample_keeps_last_cpu() {
        let samples = vec![s(10, 100), s(20, 900), s(0, 0)];
        let report = spawn(stream::iter(samples).boxed(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.usage.cpu_time_ns, 900);
        assert_eq!(report.usage.peak_memory_bytes, 20);
    }

    #[tokio::test]
    async fn decode_error_is_reported_with_partial_usage() {
        let samples = vec![
            s(70, 5),
            Err(SandboxError::StatsFailed("bad frame".into())),
            s(999, 999),
        ];
        let report = spawn(stream::iter(samples).boxed(), CancellationToken::new())
            .await
            .unwrap();
        assert!(report.failure.unwrap().contains("bad frame"));
        assert_eq!(report.usage.peak_memory_bytes, 70);
        assert_eq!(report.usage.cpu_time_ns, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_an_open_stream() {
        let cancel = CancellationToken::new();
        let open = stream::iter(vec![s(1, 1)]).chain(stream::pending()).boxed();
        let handle = spawn(open, cancel.clone());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        let report = handle.await.unwrap();
        assert_eq!(report.usage.samples, 1);
        assert_eq!(report.failure, None);
    }
}
