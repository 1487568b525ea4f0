use bollard::container::Config;
use bollard::models::{HostConfig, ResourcesUlimits};
use sandbox::{ContainerSpec, ResourceEnvelope};

use crate::config::DockerConfig;

/// Translate a resource envelope into the daemon's host config.
///
/// Ulimits carry the configured value as the soft limit; the hard limit is
/// left unbounded (-1). Networking is always off.
pub fn host_config(resources: &ResourceEnvelope, docker: &DockerConfig) -> HostConfig {
    let ulimits = resources
        .ulimits
        .iter()
        .map(|(name, soft)| ResourcesUlimits {
            name: Some(name.clone()),
            soft: Some(*soft),
            hard: Some(-1),
        })
        .collect::<Vec<_>>();

    HostConfig {
        cpu_shares: resources.cpu_shares,
        cpu_period: resources.cpu_period,
        cpu_quota: resources.cpu_quota,
        memory: resources.memory_bytes,
        memory_swap: resources.memory_swap_bytes,
        pids_limit: resources.pids_limit,
        ulimits: (!ulimits.is_empty()).then_some(ulimits),
        runtime: docker.runtime.clone(),
        network_mode: Some("none".to_string()),
        ..Default::default()
    }
}

/// Full create-container body for one submission.
pub fn container_config(spec: &ContainerSpec, docker: &DockerConfig) -> Config<String> {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    Config {
        image: Some(spec.image.clone()),
        hostname: non_empty(&spec.hostname),
        working_dir: non_empty(&spec.working_dir),
        cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
        env: (!spec.env.is_empty()).then(|| spec.env.clone()),
        attach_stdin: Some(spec.open_stdin),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        open_stdin: Some(spec.open_stdin),
        stdin_once: Some(spec.open_stdin),
        tty: Some(false),
        network_disabled: Some(true),
        host_config: Some(host_config(&spec.resources, docker)),
        ..Default::default()
    }
}
