use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox::{ResourceEnvelope, mib_to_bytes};
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

pub(crate) const DEFAULT_CLEAN_INTERVAL_MINS: u64 = 10;
pub(crate) const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 120;
/// Runtimes known not to support the attach/upload flow the orchestrator relies on.
const UNSUPPORTED_RUNTIMES: &[&str] = &["runsc"];

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Admission gate capacity.
    pub queue_cap: i64,
    /// Minutes a cached toolchain may sit idle before eviction.
    #[serde(default = "default_clean_interval")]
    pub clean_interval: u64,
    /// Per-language build templates, one directory per submission type.
    pub templates_dir: PathBuf,
    /// Root for per-exercise toolchain workspaces.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub runtime: Option<String>,
    /// Seconds a compiler may run.
    #[serde(default = "default_build_timeout")]
    pub build_timeout: u64,
    pub submission_configs: Vec<SubmissionConfig>,
}

/// How the payload reaches the sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Tar archive extracted into the working directory before start.
    #[default]
    Workspace,
    /// Raw bytes written to the container's stdin after start.
    Stdin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionConfig {
    pub id: String,
    pub container_image: String,
    /// Overrides the image's default command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub cpu_shares: Option<i64>,
    #[serde(default)]
    pub cpu_period: Option<i64>,
    #[serde(default)]
    pub cpu_quota: Option<i64>,
    /// MiB; zero leaves the engine default.
    #[serde(default)]
    pub max_memory: u64,
    /// MiB of memory plus swap; zero leaves the engine default.
    #[serde(default)]
    pub max_swap: u64,
    #[serde(default)]
    pub max_pids: Option<i64>,
    /// Wall-clock seconds.
    pub timeout: u64,
    #[serde(default)]
    pub ulimits: BTreeMap<String, i64>,
    #[serde(default)]
    pub delivery: Delivery,
}

fn default_clean_interval() -> u64 {
    DEFAULT_CLEAN_INTERVAL_MINS
}

fn default_build_timeout() -> u64 {
    DEFAULT_BUILD_TIMEOUT_SECS
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("box-toolchains")
}

impl SubmissionConfig {
    pub fn resources(&self) -> ResourceEnvelope {
        ResourceEnvelope {
            cpu_shares: self.cpu_shares,
            cpu_period: self.cpu_period,
            cpu_quota: self.cpu_quota,
            memory_bytes: mib_to_bytes(self.max_memory),
            memory_swap_bytes: mib_to_bytes(self.max_swap),
            pids_limit: self.max_pids,
            ulimits: self.ulimits.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl RunnerConfig {
    pub fn clean_interval(&self) -> Duration {
        Duration::from_secs(self.clean_interval.saturating_mul(60))
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout)
    }

    /// Resolve relative paths against `config_dir` (the directory containing the YAML file).
    fn resolve_relative_paths(&mut self, config_dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = config_dir.join(&*p);
            }
        };
        resolve(&mut self.templates_dir);
        resolve(&mut self.work_dir);
    }
}

/// Load and validate a runner config from a YAML file.
///
/// Relative paths in the config are resolved against the config file's parent directory.
pub async fn load(path: &Path) -> RunnerResult<RunnerConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RunnerError::Config(format!("read {}: {e}", path.display())))?;
    let mut config: RunnerConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| RunnerError::Config(format!("parse {}: {e}", path.display())))?;
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    validate(&config)?;
    check_path_exists(&config.templates_dir, "templates_dir").await?;
    Ok(config)
}

async fn check_path_exists(path: &Path, label: &str) -> RunnerResult<()> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| RunnerError::Config(format!("check {label}: {e}")))?;
    if !exists {
        return Err(RunnerError::Config(format!(
            "{label} not found: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Reject settings the service cannot start with. Collects every problem.
pub fn validate(config: &RunnerConfig) -> RunnerResult<()> {
    let mut errors = Vec::new();

    if config.queue_cap <= 0 {
        errors.push(format!("queue_cap must be positive (got {})", config.queue_cap));
    }
    if config.clean_interval == 0 {
        errors.push("clean_interval must be positive".to_string());
    }
    if config.build_timeout == 0 {
        errors.push("build_timeout must be positive".to_string());
    }
    if let Some(runtime) = &config.runtime
        && UNSUPPORTED_RUNTIMES.contains(&runtime.as_str())
    {
        errors.push(format!("runtime {runtime} is not supported"));
    }
    if config.submission_configs.is_empty() {
        errors.push("no submission_configs".to_string());
    }

    let mut seen = HashSet::new();
    for sc in &config.submission_configs {
        if sc.id.is_empty() {
            errors.push("submission config with empty id".to_string());
        } else if !seen.insert(sc.id.as_str()) {
            errors.push(format!("duplicate submission config: {}", sc.id));
        }
        if sc.container_image.is_empty() {
            errors.push(format!("{}: container_image is empty", sc.id));
        }
        if sc.timeout == 0 {
            errors.push(format!("{}: timeout must be positive", sc.id));
        }
        if let Err(e) = sc.resources().validate() {
            errors.push(format!("{}: {e}", sc.id));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(RunnerError::Config(errors.join("; ")))
    }
}
