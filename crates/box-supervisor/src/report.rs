use std::io::Write;
use std::time::Duration;

use box_common::{ExecutionResult, FailureReport, Metrics, TestOutcome, round_secs};

use crate::exec::{ExitKind, Run};

/// Terminal state of the supervisor. Each variant maps to exactly one document.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    StartFailed(String),
    TimedOut,
    Completed(ExecutionResult),
}

impl Outcome {
    pub fn to_json(&self) -> String {
        let encoded = match self {
            Self::StartFailed(message) => serde_json::to_string(&FailureReport::new(message.as_str())),
            Self::TimedOut => serde_json::to_string(&ExecutionResult::timed_out()),
            Self::Completed(result) => serde_json::to_string(result),
        };
        encoded.unwrap_or_else(|e| {
            let fallback = FailureReport::new(format!("encode result: {e}"));
            serde_json::to_string(&fallback)
                .unwrap_or_else(|_| r#"{"message":"encode result"}"#.to_string())
        })
    }
}

/// Write the document as the last act of the process and exit immediately.
///
/// The container's exit status is always zero once a document was written;
/// the document itself carries the verdict.
pub fn emit(outcome: &Outcome) -> ! {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", outcome.to_json());
    let _ = stdout.flush();
    std::process::exit(0)
}

/// Reduce a finished child to a result document.
pub fn assemble(run: Run, wall: Duration) -> ExecutionResult {
    let stdout = String::from_utf8_lossy(&run.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&run.stderr).into_owned();

    let (exit_code, signal) = match run.exit {
        ExitKind::Code(code) => (i64::from(code), None),
        ExitKind::Signal(sig) => (128 + i64::from(sig), Some(signal_name(sig))),
    };

    let parsed = parse_tests(&stdout);
    let (success, message, tests) = match (&signal, exit_code, parsed) {
        (Some(name), _, parsed) => (
            false,
            format!("killed by signal {name}"),
            parsed.unwrap_or_default(),
        ),
        (None, 0, Ok(tests)) => {
            let failed = tests.iter().filter(|t| !t.passed).count();
            if failed == 0 {
                (true, String::new(), tests)
            } else {
                let msg = format!("{failed} of {} tests failed", tests.len());
                (false, msg, tests)
            }
        }
        (None, 0, Err(e)) => (false, format!("malformed test report: {e}"), Vec::new()),
        (None, code, parsed) => (
            false,
            format!("exited with code {code}"),
            parsed.unwrap_or_default(),
        ),
    };

    ExecutionResult {
        success,
        message,
        tests,
        stdout,
        stderr,
        metrics: Some(Metrics {
            exit_code,
            wall_time: round_secs(wall.as_secs_f64()),
            cpu_time: run.usage.user_ns.saturating_add(run.usage.sys_ns),
            memory: run.usage.max_rss_bytes,
            user_time: Some(run.usage.user_ns),
            sys_time: Some(run.usage.sys_ns),
            signal,
        }),
    }
}

/// The harness prints its outcome list as JSON. Anything it logged before
/// that is tolerated: the whole output is tried first, then the last line.
fn parse_tests(stdout: &str) -> Result<Vec<TestOutcome>, serde_json::Error> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).or_else(|whole| {
        match trimmed.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(last) if last.len() < trimmed.len() => serde_json::from_str(last.trim()),
            _ => Err(whole),
        }
    })
}

fn signal_name(sig: i32) -> String {
    nix::sys::signal::Signal::try_from(sig)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {sig}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Usage;

    fn run(exit: ExitKind, stdout: &str) -> Run {
        Run {
            exit,
            usage: Usage {
                user_ns: 3_000,
                sys_ns: 1_000,
                max_rss_bytes: 4096,
            },
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    #[test]
    fn passing_tests_succeed() {
        let out = r#"[{"passed":true,"name":"adds"},{"passed":true,"name":"subs"}]"#;
        let r = assemble(run(ExitKind::Code(0), out), Duration::from_millis(1234));
        assert!(r.success);
        assert_eq!(r.tests.len(), 2);
        let m = r.metrics.unwrap();
        assert_eq!(m.exit_code, 0);
        assert_eq!(m.wall_time, 1.23);
        assert_eq!(m.cpu_time, 4_000);
        assert_eq!(m.memory, 4096);
        assert!(m.signal.is_none());
    }

    #[test]
    fn failing_test_fails_run() {
        let out = r#"[{"passed":true,"name":"a"},{"passed":false,"name":"b","message":"1 != 2"}]"#;
        let r = assemble(run(ExitKind::Code(0), out), Duration::ZERO);
        assert!(!r.success);
        assert_eq!(r.message, "1 of 2 tests failed");
    }

    #[test]
    fn report_after_log_lines_is_found() {
        let out = "collecting...\n[{\"passed\":true,\"name\":\"a\"}]\n";
        let r = assemble(run(ExitKind::Code(0), out), Duration::ZERO);
        assert!(r.success, "message: {}", r.message);
        assert_eq!(r.tests.len(), 1);
    }

    #[test]
    fn garbage_stdout_is_malformed() {
        let r = assemble(run(ExitKind::Code(0), "hello"), Duration::ZERO);
        assert!(!r.success);
        assert!(r.message.starts_with("malformed test report"), "got: {}", r.message);
        assert_eq!(r.stdout, "hello");
    }

    #[test]
    fn nonzero_exit_keeps_reported_tests() {
        let out = r#"[{"passed":false,"name":"a"}]"#;
        let r = assemble(run(ExitKind::Code(1), out), Duration::ZERO);
        assert!(!r.success);
        assert_eq!(r.message, "exited with code 1");
        assert_eq!(r.tests.len(), 1);
        assert_eq!(r.metrics.unwrap().exit_code, 1);
    }

    #[test]
    fn signal_reported_by_name() {
        let r = assemble(run(ExitKind::Signal(9), ""), Duration::ZERO);
        assert!(!r.success);
        assert_eq!(r.message, "killed by signal SIGKILL");
        let m = r.metrics.unwrap();
        assert_eq!(m.exit_code, 137);
        assert_eq!(m.signal.as_deref(), Some("SIGKILL"));
    }

    #[test]
    fn start_failure_document_is_message_only() {
        let json = Outcome::StartFailed("TIMEOUT is not set".into()).to_json();
        assert_eq!(json, r#"{"message":"TIMEOUT is not set"}"#);
    }

    #[test]
    fn timeout_document() {
        let v: serde_json::Value = serde_json::from_str(&Outcome::TimedOut.to_json()).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["message"], "time limit exceeded");
    }
}
