use crate::capabilities::DEFAULT_CAPABILITIES;
use crate::oci::{
    Linux, LinuxCapabilities, LinuxDeviceCgroup, LinuxNamespace, LinuxNamespaceType,
    LinuxResources, Mount, PosixRlimit, Process, Root, RuntimeSpec, User, OCI_VERSION,
};
use std::collections::BTreeMap;

pub const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
pub const DEFAULT_TERM: &str = "TERM=xterm";

/// The baseline document every synthesis starts from.
///
/// Mirrors what a runtime generator produces for a fresh Linux container:
/// the standard pseudo-filesystem mounts, private pid/network/ipc/uts/mount
/// namespaces, the default capability set, and a deny-all device cgroup.
pub fn default_spec() -> RuntimeSpec {
    let caps: Vec<String> = DEFAULT_CAPABILITIES.iter().map(|c| (*c).to_owned()).collect();

    RuntimeSpec {
        oci_version: OCI_VERSION.to_owned(),
        process: Some(Process {
            terminal: false,
            user: User::default(),
            args: vec!["sh".to_owned()],
            env: vec![DEFAULT_PATH.to_owned(), DEFAULT_TERM.to_owned()],
            cwd: "/".to_owned(),
            capabilities: Some(LinuxCapabilities {
                bounding: caps.clone(),
                effective: caps.clone(),
                inheritable: caps.clone(),
                permitted: caps,
                ambient: Vec::new(),
            }),
            rlimits: vec![PosixRlimit {
                typ: "RLIMIT_NOFILE".to_owned(),
                hard: 1024,
                soft: 1024,
            }],
            no_new_privileges: false,
            apparmor_profile: None,
            oom_score_adj: None,
            selinux_label: None,
        }),
        root: Some(Root {
            path: "rootfs".to_owned(),
            readonly: false,
        }),
        hostname: None,
        mounts: default_mounts(),
        annotations: BTreeMap::new(),
        linux: Some(Linux {
            resources: Some(LinuxResources {
                devices: vec![LinuxDeviceCgroup {
                    allow: false,
                    typ: None,
                    major: None,
                    minor: None,
                    access: Some("rwm".to_owned()),
                }],
                ..LinuxResources::default()
            }),
            namespaces: [
                LinuxNamespaceType::Pid,
                LinuxNamespaceType::Network,
                LinuxNamespaceType::Ipc,
                LinuxNamespaceType::Uts,
                LinuxNamespaceType::Mount,
            ]
            .into_iter()
            .map(|typ| LinuxNamespace { typ, path: None })
            .collect(),
            ..Linux::default()
        }),
    }
}

fn default_mounts() -> Vec<Mount> {
    vec![
        Mount::new("/proc", "proc", "proc", &[]),
        Mount::new(
            "/dev",
            "tmpfs",
            "tmpfs",
            &["nosuid", "strictatime", "mode=755", "size=65536k"],
        ),
        Mount::new(
            "/dev/pts",
            "devpts",
            "devpts",
            &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620", "gid=5"],
        ),
        Mount::new(
            "/dev/shm",
            "tmpfs",
            "shm",
            &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
        ),
        Mount::new("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
        Mount::new("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
    ]
}
