use crate::RuntimeError;

/// Every capability the kernel defines, in bit order.
pub const ALL_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
    "CAP_PERFMON",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
];

/// The bounding set an unprivileged container starts with.
pub const DEFAULT_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FSETID",
    "CAP_FOWNER",
    "CAP_MKNOD",
    "CAP_NET_RAW",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETFCAP",
    "CAP_SETPCAP",
    "CAP_NET_BIND_SERVICE",
    "CAP_SYS_CHROOT",
    "CAP_KILL",
    "CAP_AUDIT_WRITE",
];

#[derive(Debug, PartialEq, Eq)]
enum CapName {
    All,
    Cap(String),
}

fn normalize(raw: &str) -> Result<CapName, RuntimeError> {
    let upper = raw.trim().to_ascii_uppercase();
    if upper == "ALL" {
        return Ok(CapName::All);
    }
    let name = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    };
    if ALL_CAPABILITIES.contains(&name.as_str()) {
        Ok(CapName::Cap(name))
    } else {
        Err(RuntimeError::UnknownCapability(raw.to_owned()))
    }
}

/// Compute the capability set for a container.
///
/// Privileged containers get every capability. Otherwise the default set is
/// extended by `add` and reduced by `drop`. `ALL` in `add` starts from every
/// capability; `ALL` in `drop` starts from none, so `drop = [ALL]` with
/// `add = [NET_ADMIN]` yields only `CAP_NET_ADMIN`. A capability named in
/// both lists is dropped.
pub fn capability_set(
    privileged: bool,
    add: &[String],
    drop: &[String],
) -> Result<Vec<String>, RuntimeError> {
    let adds = add.iter().map(|c| normalize(c)).collect::<Result<Vec<_>, _>>()?;
    let drops = drop.iter().map(|c| normalize(c)).collect::<Result<Vec<_>, _>>()?;

    if privileged {
        return Ok(ALL_CAPABILITIES.iter().map(|c| (*c).to_owned()).collect());
    }

    let base = if adds.contains(&CapName::All) {
        ALL_CAPABILITIES
    } else {
        DEFAULT_CAPABILITIES
    };
    let mut caps: Vec<String> = if drops.contains(&CapName::All) {
        Vec::new()
    } else {
        base.iter().map(|c| (*c).to_owned()).collect()
    };

    for cap in &adds {
        if let CapName::Cap(name) = cap {
            if !caps.contains(name) {
                caps.push(name.clone());
            }
        }
    }
    caps.retain(|c| !drops.contains(&CapName::Cap(c.clone())));
    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn default_set_without_tweaks() {
        let caps = capability_set(false, &[], &[]).unwrap();
        assert_eq!(caps, DEFAULT_CAPABILITIES);
    }

    #[test]
    fn add_then_drop() {
        let caps = capability_set(false, &strings(&["net_admin", "CAP_SYS_TIME"]), &strings(&["mknod"]))
            .unwrap();
        assert!(caps.contains(&"CAP_NET_ADMIN".to_owned()));
        assert!(caps.contains(&"CAP_SYS_TIME".to_owned()));
        assert!(!caps.contains(&"CAP_MKNOD".to_owned()));
        assert_eq!(caps.len(), DEFAULT_CAPABILITIES.len() + 1);
    }

    #[test]
    fn named_drop_beats_named_add() {
        let caps = capability_set(false, &strings(&["SYS_ADMIN"]), &strings(&["SYS_ADMIN"])).unwrap();
        assert!(!caps.contains(&"CAP_SYS_ADMIN".to_owned()));
    }

    #[test]
    fn drop_all_keeps_explicit_adds() {
        let caps = capability_set(false, &strings(&["NET_BIND_SERVICE"]), &strings(&["all"])).unwrap();
        assert_eq!(caps, ["CAP_NET_BIND_SERVICE"]);
    }

    #[test]
    fn add_all_grants_everything() {
        let caps = capability_set(false, &strings(&["ALL"]), &strings(&["SYS_MODULE"])).unwrap();
        assert_eq!(caps.len(), ALL_CAPABILITIES.len() - 1);
    }

    #[test]
    fn privileged_ignores_lists() {
        let caps = capability_set(true, &[], &strings(&["ALL"])).unwrap();
        assert_eq!(caps.len(), ALL_CAPABILITIES.len());
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let err = capability_set(false, &strings(&["FLY"]), &[]).unwrap_err();
        assert!(err.to_string().contains("FLY"));
        assert!(capability_set(true, &[], &strings(&["CAP_NOPE"])).is_err());
    }
}
