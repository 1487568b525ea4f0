use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::SetupError;

/// Run a submission inside the sandbox and report one JSON document.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "box-supervisor", version)]
pub struct Args {
    /// Write stdin to FILE (mode 0755) and execute it with ARGS
    #[arg(long, value_name = "FILE", conflicts_with = "stage_bundle")]
    pub stage_binary: Option<PathBuf>,

    /// Decode a JSON source bundle from stdin into DIR, then run ARGS inside DIR
    #[arg(long, value_name = "DIR")]
    pub stage_bundle: Option<PathBuf>,

    /// Wall-clock limit in seconds
    #[arg(long, env = "TIMEOUT", hide_env_values = true)]
    pub timeout: Option<String>,

    /// Program and arguments after `--` (arguments only with --stage-binary)
    #[arg(last = true, value_name = "ARGS")]
    pub command: Vec<String>,
}

impl Args {
    /// Like `Args::try_parse`, but folds clap errors (including help and
    /// version requests) into a setup failure so stdout stays one document.
    pub fn from_env() -> Result<Self, SetupError> {
        Self::try_parse().map_err(|e| SetupError::Args(e.to_string().trim().to_string()))
    }
}

/// Parse the deadline parameter: a positive, finite number of seconds.
pub fn parse_timeout(raw: Option<&str>) -> Result<Duration, SetupError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let raw = raw.ok_or(SetupError::MissingTimeout)?;
    let secs: f64 = raw
        .parse()
        .map_err(|_| SetupError::InvalidTimeout(raw.to_string()))?;
    if secs <= 0.0 {
        return Err(SetupError::InvalidTimeout(raw.to_string()));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| SetupError::InvalidTimeout(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_accepts_whole_and_fractional_seconds() {
        assert_eq!(parse_timeout(Some("5")).unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout(Some(" 0.5 ")).unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn timeout_rejects_missing_zero_and_garbage() {
        assert!(matches!(parse_timeout(None), Err(SetupError::MissingTimeout)));
        assert!(matches!(parse_timeout(Some("")), Err(SetupError::MissingTimeout)));
        for bad in ["0", "-3", "abc", "inf", "NaN"] {
            assert!(
                matches!(parse_timeout(Some(bad)), Err(SetupError::InvalidTimeout(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn trailing_args_keep_hyphens() {
        let args = Args::try_parse_from([
            "box-supervisor",
            "--timeout",
            "2",
            "--",
            "python3",
            "-u",
            "main.py",
        ])
        .unwrap();
        assert_eq!(args.command, ["python3", "-u", "main.py"]);
        assert_eq!(args.timeout.as_deref(), Some("2"));
    }

    #[test]
    fn mistyped_flag_is_an_error_not_a_program() {
        let err = Args::try_parse_from([
            "box-supervisor",
            "--stage-binray",
            "/tmp/box",
            "--",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);

        let err = Args::try_parse_from(["box-supervisor", "python3", "main.py"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn staging_modes_are_exclusive() {
        let err = Args::try_parse_from([
            "box-supervisor",
            "--stage-binary",
            "/tmp/box",
            "--stage-bundle",
            "/tmp/src",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
