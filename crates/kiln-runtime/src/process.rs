//! Process-level settings: rlimits, sysctls, environment and id mappings.

use crate::oci::{LinuxIdMapping, PosixRlimit};
use crate::RuntimeError;
use std::collections::BTreeMap;

const ULIMIT_NAMES: &[&str] = &[
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

/// `RLIM_INFINITY` as the runtime expects it.
pub const RLIMIT_UNLIMITED: u64 = u64::MAX;

const SYSCTL_KEYS: &[&str] = &[
    "kernel.msgmax",
    "kernel.msgmnb",
    "kernel.msgmni",
    "kernel.sem",
    "kernel.shmall",
    "kernel.shmmax",
    "kernel.shmmni",
    "kernel.shm_rmid_forced",
];

const SYSCTL_PREFIXES: &[&str] = &["net.", "fs.mqueue."];

/// Parse a `name=soft[:hard]` ulimit into an rlimit entry.
pub fn parse_ulimit(spec: &str) -> Result<PosixRlimit, RuntimeError> {
    let invalid = |reason: String| RuntimeError::InvalidUlimit {
        spec: spec.to_owned(),
        reason,
    };

    let (name, values) = spec
        .split_once('=')
        .ok_or_else(|| invalid("expected name=soft[:hard]".to_owned()))?;
    let name = name.trim().to_ascii_lowercase();
    if !ULIMIT_NAMES.contains(&name.as_str()) {
        return Err(invalid(format!("unknown limit '{name}'")));
    }

    let (soft, hard) = match values.split_once(':') {
        Some((soft, hard)) => (soft, hard),
        None => (values, values),
    };
    let soft = limit_value(soft).ok_or_else(|| invalid(format!("invalid soft limit '{soft}'")))?;
    let hard = limit_value(hard).ok_or_else(|| invalid(format!("invalid hard limit '{hard}'")))?;
    if soft > hard {
        return Err(invalid(format!(
            "soft limit {soft} exceeds hard limit {hard}"
        )));
    }

    Ok(PosixRlimit {
        typ: format!("RLIMIT_{}", name.to_ascii_uppercase()),
        hard,
        soft,
    })
}

fn limit_value(raw: &str) -> Option<u64> {
    match raw.trim() {
        "-1" | "unlimited" => Some(RLIMIT_UNLIMITED),
        other => other.parse().ok(),
    }
}

/// Apply ulimit strings on top of `rlimits`, replacing entries of the same type.
pub fn apply_ulimits(rlimits: &mut Vec<PosixRlimit>, specs: &[String]) -> Result<(), RuntimeError> {
    for spec in specs {
        let parsed = parse_ulimit(spec)?;
        match rlimits.iter_mut().find(|r| r.typ == parsed.typ) {
            Some(existing) => *existing = parsed,
            None => rlimits.push(parsed),
        }
    }
    Ok(())
}

/// Check that `key` may be set inside a container.
///
/// Network sysctls need a network namespace of their own, IPC sysctls an
/// IPC namespace of their own.
pub fn validate_sysctl(key: &str, host_network: bool, host_ipc: bool) -> Result<(), RuntimeError> {
    let invalid = |reason: &str| RuntimeError::InvalidSysctl {
        key: key.to_owned(),
        reason: reason.to_owned(),
    };

    if key.starts_with("net.") {
        if host_network {
            return Err(invalid("network namespace is shared with the host"));
        }
        return Ok(());
    }
    if SYSCTL_KEYS.contains(&key) || SYSCTL_PREFIXES.iter().any(|p| key.starts_with(p)) {
        if host_ipc {
            return Err(invalid("ipc namespace is shared with the host"));
        }
        return Ok(());
    }
    Err(invalid("not a namespaced sysctl"))
}

/// Set `key=value` in `env`, replacing an existing entry for `key` in place.
pub fn set_env(env: &mut Vec<String>, key: &str, value: &str) {
    let entry = format!("{key}={value}");
    match env
        .iter_mut()
        .find(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k) == key)
    {
        Some(existing) => *existing = entry,
        None => env.push(entry),
    }
}

/// Build the process environment.
///
/// Order: `base` entries, `container=kiln`, `HOSTNAME` when set, then the
/// user's keys. Later writes to an existing key overwrite it where it stands.
pub fn merge_env(base: &[String], hostname: &str, user: &BTreeMap<String, String>) -> Vec<String> {
    let mut env = base.to_vec();
    set_env(&mut env, "container", "kiln");
    if !hostname.is_empty() {
        set_env(&mut env, "HOSTNAME", hostname);
    }
    for (key, value) in user {
        set_env(&mut env, key, value);
    }
    env
}

/// Parse a `container_id:host_id:size` mapping.
pub fn parse_id_mapping(spec: &str) -> Result<LinuxIdMapping, RuntimeError> {
    let invalid = |reason: &str| RuntimeError::InvalidIdMapping {
        spec: spec.to_owned(),
        reason: reason.to_owned(),
    };

    let fields: Vec<&str> = spec.split(':').collect();
    let [container, host, size] = fields.as_slice() else {
        return Err(invalid("expected container_id:host_id:size"));
    };
    let number = |s: &str| s.trim().parse::<u32>().map_err(|_| invalid("ids must be unsigned integers"));
    let mapping = LinuxIdMapping {
        container_id: number(*container)?,
        host_id: number(*host)?,
        size: number(*size)?,
    };
    if mapping.size == 0 {
        return Err(invalid("size must be positive"));
    }
    Ok(mapping)
}

pub fn parse_id_mappings(specs: &[String]) -> Result<Vec<LinuxIdMapping>, RuntimeError> {
    specs.iter().map(|s| parse_id_mapping(s)).collect()
}
