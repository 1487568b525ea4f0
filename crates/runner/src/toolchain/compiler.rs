//! Running a compiler subprocess and classifying how it ended.

use std::ffi::OsStr;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::ToolchainError;

/// A compiler that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CompilerExit {
    Success,
    /// Non-zero exit: the submission does not compile.
    Rejected { diagnostics: String },
}

pub(crate) async fn run_compiler<I, S>(
    program: &Path,
    args: I,
    cwd: &Path,
    timeout: Duration,
) -> Result<CompilerExit, ToolchainError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = program.display().to_string();
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolchainError::Spawn {
            program: name.clone(),
            source,
        })?;
    let pid = child.id();

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output.map_err(|source| ToolchainError::Spawn {
            program: name.clone(),
            source,
        })?,
        Err(_) => {
            kill_process_group(pid);
            return Err(ToolchainError::TimedOut {
                program: name,
                after: timeout,
            });
        }
    };

    let diagnostics = diagnostics(&output.stdout, &output.stderr);
    match (output.status.code(), output.status.signal()) {
        (Some(0), _) => Ok(CompilerExit::Success),
        (Some(_), _) => Ok(CompilerExit::Rejected { diagnostics }),
        (None, signal) => Err(ToolchainError::Crashed {
            program: name,
            signal: signal.map(signal_name).unwrap_or_else(|| "unknown".to_string()),
            diagnostics,
        }),
    }
}

/// Some compilers report errors on stdout, others on stderr.
fn diagnostics(stdout: &[u8], stderr: &[u8]) -> String {
    [stderr, stdout]
        .iter()
        .map(|b| String::from_utf8_lossy(b).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn signal_name(sig: i32) -> String {
    nix::sys::signal::Signal::try_from(sig)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| sig.to_string())
}

fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid
        && let Ok(pid) = i32::try_from(pid)
    {
        let pgid = nix::unistd::Pid::from_raw(pid);
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}
