//! Bind, tmpfs, cgroup and sysfs mount construction.

use crate::oci::Mount;
use crate::RuntimeError;
use std::path::Path;
use std::process::Command;
use tracing::debug;

pub const CGROUP_MOUNT: &str = "/sys/fs/cgroup";

const PROPAGATION: &[&str] = &["private", "rprivate", "shared", "rshared", "slave", "rslave"];

const DEFAULT_TMPFS_OPTIONS: &[&str] = &[
    "rw",
    "rprivate",
    "noexec",
    "nosuid",
    "nodev",
    "size=65536k",
];

const TMPFS_FLAGS: &[&str] = &[
    "rw", "ro", "exec", "noexec", "suid", "nosuid", "dev", "nodev", "sync", "async", "dirsync",
    "mand", "nomand", "atime", "noatime", "diratime", "nodiratime", "relatime", "norelatime",
    "strictatime", "nostrictatime", "tmpcopyup", "private", "rprivate", "shared", "rshared",
    "slave", "rslave",
];

const TMPFS_KEYS: &[&str] = &["size", "mode", "uid", "gid", "nr_inodes", "nr_blocks", "mpol"];

/// The cgroup filesystem, read-only unless the container is privileged.
pub fn cgroup_mount(privileged: bool) -> Mount {
    let access = if privileged { "rw" } else { "ro" };
    Mount::new(
        CGROUP_MOUNT,
        "cgroup",
        "cgroup",
        &["rprivate", "nosuid", "noexec", "nodev", "relatime", access],
    )
}

/// Writable sysfs for privileged containers.
pub fn privileged_sysfs_mount() -> Mount {
    Mount::new(
        "/sys",
        "sysfs",
        "sysfs",
        &["rprivate", "nosuid", "noexec", "nodev", "rw"],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSharing {
    /// `z`: content shared between containers.
    Shared,
    /// `Z`: content private to this container.
    Private,
}

/// A parsed `host:container[:options]` bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMountSpec {
    pub host_path: String,
    pub container_path: String,
    /// Options as passed to the runtime: user options, then `rbind`, then
    /// the `rw` and `private` defaults when not given.
    pub options: Vec<String>,
    pub relabel: Option<LabelSharing>,
    /// Propagation keyword given explicitly by the user.
    pub propagation: Option<String>,
}

impl BindMountSpec {
    pub fn parse(spec: &str) -> Result<Self, RuntimeError> {
        let invalid = |reason: String| RuntimeError::InvalidMount {
            spec: spec.to_owned(),
            reason,
        };

        let parts: Vec<&str> = spec.split(':').collect();
        let (host, container, raw_opts) = match parts.as_slice() {
            [host, container] => (*host, *container, None),
            [host, container, opts] => (*host, *container, Some(*opts)),
            _ => return Err(invalid("expected host:container[:options]".to_owned())),
        };
        if !host.starts_with('/') {
            return Err(invalid(format!("host path '{host}' must be absolute")));
        }
        if !container.starts_with('/') {
            return Err(invalid(format!(
                "container path '{container}' must be absolute"
            )));
        }

        let mut options = Vec::new();
        let mut access: Option<&str> = None;
        let mut relabel: Option<&str> = None;
        let mut propagation: Option<&str> = None;

        let requested: Vec<&str> = raw_opts.map_or_else(Vec::new, |o| o.split(',').collect());
        for opt in requested {
            let slot = match opt {
                "rw" | "ro" => &mut access,
                "z" | "Z" => &mut relabel,
                p if PROPAGATION.contains(&p) => &mut propagation,
                other => return Err(invalid(format!("invalid option '{other}'"))),
            };
            if let Some(previous) = slot {
                return Err(invalid(format!(
                    "options '{previous}' and '{opt}' conflict"
                )));
            }
            *slot = Some(opt);
            options.push(opt.to_owned());
        }

        options.push("rbind".to_owned());
        if access.is_none() {
            options.push("rw".to_owned());
        }
        if propagation.is_none() {
            options.push("private".to_owned());
        }

        Ok(Self {
            host_path: host.to_owned(),
            container_path: container.to_owned(),
            options,
            relabel: relabel.map(|z| {
                if z == "z" {
                    LabelSharing::Shared
                } else {
                    LabelSharing::Private
                }
            }),
            propagation: propagation.map(str::to_owned),
        })
    }

    /// Resolve the host path through symlinks, relabel it if requested, and
    /// build the runtime mount entry.
    pub fn into_mount(self, relabeler: &dyn Relabel, mount_label: &str) -> Result<Mount, RuntimeError> {
        let source = std::fs::canonicalize(&self.host_path).map_err(|e| RuntimeError::InvalidMount {
            spec: self.host_path.clone(),
            reason: format!("cannot resolve host path: {e}"),
        })?;

        if let Some(sharing) = self.relabel {
            relabeler.relabel(&source, mount_label, sharing == LabelSharing::Shared)?;
        }

        Ok(Mount {
            destination: self.container_path,
            typ: Some("bind".to_owned()),
            source: Some(source.to_string_lossy().into_owned()),
            options: self.options,
        })
    }
}

/// A parsed `container_path[:options]` tmpfs mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpfsSpec {
    pub container_path: String,
    pub options: Vec<String>,
}

impl TmpfsSpec {
    pub fn parse(spec: &str) -> Result<Self, RuntimeError> {
        let invalid = |reason: String| RuntimeError::InvalidMount {
            spec: spec.to_owned(),
            reason,
        };

        let (path, raw_opts) = match spec.split_once(':') {
            Some((path, opts)) => (path, Some(opts)),
            None => (spec, None),
        };
        if !path.starts_with('/') {
            return Err(invalid(format!("tmpfs path '{path}' must be absolute")));
        }

        let mut options: Vec<String> = match raw_opts {
            Some(opts) if !opts.is_empty() => opts.split(',').map(str::to_owned).collect(),
            _ => DEFAULT_TMPFS_OPTIONS.iter().map(|o| (*o).to_owned()).collect(),
        };
        for opt in &options {
            if !valid_tmpfs_option(opt) {
                return Err(invalid(format!("invalid tmpfs option '{opt}'")));
            }
        }
        if !options.iter().any(|o| o == "tmpcopyup") {
            options.push("tmpcopyup".to_owned());
        }

        Ok(Self {
            container_path: path.to_owned(),
            options,
        })
    }

    pub fn into_mount(self) -> Mount {
        Mount {
            destination: self.container_path,
            typ: Some("tmpfs".to_owned()),
            source: Some("tmpfs".to_owned()),
            options: self.options,
        }
    }
}

fn valid_tmpfs_option(opt: &str) -> bool {
    match opt.split_once('=') {
        Some((key, value)) => TMPFS_KEYS.contains(&key) && !value.is_empty(),
        None => TMPFS_FLAGS.contains(&opt),
    }
}

/// SELinux relabeling of bind-mount sources.
pub trait Relabel: Send + Sync {
    fn relabel(&self, path: &Path, mount_label: &str, shared: bool) -> Result<(), RuntimeError>;
}

/// Relabels with `chcon -R` when SELinux is enabled; otherwise a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChconRelabel;

impl Relabel for ChconRelabel {
    fn relabel(&self, path: &Path, mount_label: &str, shared: bool) -> Result<(), RuntimeError> {
        if mount_label.is_empty() || !Path::new("/sys/fs/selinux/enforce").exists() {
            debug!("selinux inactive, not relabeling {}", path.display());
            return Ok(());
        }

        let label = if shared {
            shared_label(mount_label)
        } else {
            mount_label.to_owned()
        };
        debug!("relabeling {} as {label}", path.display());

        let output = Command::new("chcon")
            .arg("-R")
            .arg(&label)
            .arg(path)
            .output()
            .map_err(|e| RuntimeError::Relabel {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(RuntimeError::Relabel {
                path: path.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

/// Drop the MCS categories so every container can read the content.
fn shared_label(label: &str) -> String {
    label.split(':').take(4).collect::<Vec<_>>().join(":")
}
