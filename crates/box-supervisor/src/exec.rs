//! Spawning the target and enforcing the deadline.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use box_common::log_warn;
use nix::sys::resource::{UsageWho, getrusage};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::SetupError;
use crate::stage::Plan;

const LOG_TAG: &str = box_common::log::SUPERVISOR_TAG;

/// Bytes kept from each output stream; the remainder is drained and dropped.
pub const CAPTURE_LIMIT: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    Signal(i32),
}

/// OS-level usage of the reaped child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub user_ns: u64,
    pub sys_ns: u64,
    pub max_rss_bytes: u64,
}

#[derive(Debug)]
pub struct Run {
    pub exit: ExitKind,
    pub usage: Usage,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug)]
pub enum Finished {
    Exited(Run),
    TimedOut,
}

pub async fn run(plan: &Plan, timeout: Duration) -> Result<Finished, SetupError> {
    let mut cmd = Command::new(&plan.program);
    cmd.args(&plan.args)
        .stdin(if plan.stdin_consumed {
            Stdio::null()
        } else {
            Stdio::inherit()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    if let Some(cwd) = &plan.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(|source| SetupError::Spawn {
        program: plan.program.display().to_string(),
        source,
    })?;

    let stdout = capture(child.stdout.take());
    let stderr = capture(child.stderr.take());

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.map_err(SetupError::Wait)?,
        Err(_) => {
            kill_process_group(&child);
            if let Err(e) = child.kill().await {
                log_warn!(LOG_TAG, "reap after timeout failed: {e}");
            }
            stdout.abort();
            stderr.abort();
            return Ok(Finished::TimedOut);
        }
    };

    // Grandchildren may still hold the pipes open.
    kill_process_group(&child);
    let stdout = stdout.await.unwrap_or_default();
    let stderr = stderr.await.unwrap_or_default();

    Ok(Finished::Exited(Run {
        exit: exit_kind(status),
        usage: children_usage(),
        stdout,
        stderr,
    }))
}

fn exit_kind(status: ExitStatus) -> ExitKind {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitKind::Code(code),
        (None, Some(sig)) => ExitKind::Signal(sig),
        (None, None) => ExitKind::Code(-1),
    }
}

/// Kill the whole process group of `child`; the child was spawned with
/// `process_group(0)` so its PGID equals its PID.
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id()
        && let Ok(pid) = i32::try_from(pid)
    {
        let pgid = nix::unistd::Pid::from_raw(pid);
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}

fn capture<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match reader {
            Some(mut r) => read_capped(&mut r, CAPTURE_LIMIT).await,
            None => Vec::new(),
        }
    })
}

/// Read `reader` to EOF, keeping at most `limit` bytes.
pub async fn read_capped<R>(reader: &mut R, limit: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let room = limit.saturating_sub(kept.len());
        if room > 0 {
            let take = n.min(room);
            kept.extend_from_slice(buf.get(..take).unwrap_or_default());
        }
    }
    kept
}

/// Usage of all reaped children, i.e. the target and its descendants.
fn children_usage() -> Usage {
    match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(u) => Usage {
            user_ns: timeval_ns(u.user_time()),
            sys_ns: timeval_ns(u.system_time()),
            // Linux reports kilobytes.
            max_rss_bytes: u64::try_from(u.max_rss()).unwrap_or(0).saturating_mul(1024),
        },
        Err(e) => {
            log_warn!(LOG_TAG, "getrusage failed: {e}");
            Usage::default()
        }
    }
}

fn timeval_ns(tv: nix::sys::time::TimeVal) -> u64 {
    let secs = u64::try_from(tv.tv_sec()).unwrap_or(0);
    let micros = u64::try_from(tv.tv_usec()).unwrap_or(0);
    secs.saturating_mul(1_000_000_000)
        .saturating_add(micros.saturating_mul(1_000))
}
