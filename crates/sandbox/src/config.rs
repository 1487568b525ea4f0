use std::collections::BTreeMap;

use crate::error::{Result, SandboxError};

/// Resource envelope applied to one container. Byte values are already
/// converted from the MiB figures operators configure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceEnvelope {
    pub cpu_shares: Option<i64>,
    pub cpu_period: Option<i64>,
    pub cpu_quota: Option<i64>,
    pub memory_bytes: Option<i64>,
    /// Memory plus swap, as the engine expects it.
    pub memory_swap_bytes: Option<i64>,
    pub pids_limit: Option<i64>,
    /// Soft limits keyed by ulimit name. Hard limits are left unbounded.
    pub ulimits: BTreeMap<String, i64>,
}

/// Everything the engine needs to allocate one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub hostname: String,
    pub working_dir: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// Keep stdin open so a payload can be written after start.
    pub open_stdin: bool,
    pub resources: ResourceEnvelope,
}

/// Resource names accepted as ulimits.
pub const ULIMIT_NAMES: &[&str] = &[
    "core",
    "cpu",
    "data",
    "fsize",
    "locks",
    "memlock",
    "msgqueue",
    "nice",
    "nofile",
    "nproc",
    "rss",
    "rtprio",
    "rttime",
    "sigpending",
    "stack",
];

const MIB: i64 = 1024 * 1024;

/// Convert a MiB figure to bytes, treating zero as "unset".
pub fn mib_to_bytes(mib: u64) -> Option<i64> {
    if mib == 0 {
        return None;
    }
    i64::try_from(mib).ok().and_then(|m| m.checked_mul(MIB))
}

impl ResourceEnvelope {
    /// Reject limits no engine could honour.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (label, value) in [
            ("cpu_shares", self.cpu_shares),
            ("cpu_period", self.cpu_period),
            ("cpu_quota", self.cpu_quota),
            ("memory", self.memory_bytes),
            ("memory_swap", self.memory_swap_bytes),
            ("pids_limit", self.pids_limit),
        ] {
            if let Some(v) = value
                && v < 0
            {
                errors.push(format!("{label} must not be negative (got {v})"));
            }
        }
        if let (Some(mem), Some(swap)) = (self.memory_bytes, self.memory_swap_bytes)
            && swap < mem
        {
            errors.push(format!(
                "memory_swap ({swap} bytes) must be at least memory ({mem} bytes)"
            ));
        }
        for (name, soft) in &self.ulimits {
            if !ULIMIT_NAMES.contains(&name.as_str()) {
                errors.push(format!("unknown ulimit: {name}"));
            }
            if *soft < 0 {
                errors.push(format!("ulimit {name} must not be negative (got {soft})"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::InvalidConfig(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mib_conversion() {
        assert_eq!(mib_to_bytes(0), None);
        assert_eq!(mib_to_bytes(1), Some(1_048_576));
        assert_eq!(mib_to_bytes(256), Some(268_435_456));
        assert_eq!(mib_to_bytes(u64::MAX), None);
    }

    #[test]
    fn validate_accepts_typical_envelope() {
        let env = ResourceEnvelope {
            cpu_period: Some(100_000),
            cpu_quota: Some(50_000),
            memory_bytes: mib_to_bytes(256),
            memory_swap_bytes: mib_to_bytes(256),
            pids_limit: Some(64),
            ulimits: BTreeMap::from([("nofile".to_string(), 64), ("fsize".to_string(), 1 << 20)]),
            ..Default::default()
        };
        env.validate().unwrap();
    }

    #[test]
    fn validate_collects_every_problem() {
        let env = ResourceEnvelope {
            pids_limit: Some(-1),
            memory_bytes: Some(2 * MIB),
            memory_swap_bytes: Some(MIB),
            ulimits: BTreeMap::from([("bogus".to_string(), 1)]),
            ..Default::default()
        };
        let msg = env.validate().unwrap_err().to_string();
        assert!(msg.contains("pids_limit"), "got: {msg}");
        assert!(msg.contains("memory_swap"), "got: {msg}");
        assert!(msg.contains("unknown ulimit: bogus"), "got: {msg}");
    }
}
