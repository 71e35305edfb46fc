use crate::oci::{LinuxDevice, LinuxDeviceCgroup, LinuxDeviceType};
use crate::RuntimeError;
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

/// A `host[:container[:permissions]]` device request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub host_path: String,
    pub container_path: String,
    pub permissions: String,
}

impl DeviceRequest {
    pub fn parse(spec: &str) -> Result<Self, RuntimeError> {
        let invalid = |reason: &str| RuntimeError::InvalidDevice {
            spec: spec.to_owned(),
            reason: reason.to_owned(),
        };

        let parts: Vec<&str> = spec.split(':').collect();
        let (host, container, permissions) = match parts.as_slice() {
            [host] => (*host, *host, "rwm"),
            [host, second] if validate_device_mode(second) => (*host, *host, *second),
            [host, container] => (*host, *container, "rwm"),
            [host, container, perms] => {
                if !validate_device_mode(perms) {
                    return Err(invalid("permissions must be a combination of r, w and m"));
                }
                (*host, *container, *perms)
            }
            _ => return Err(invalid("expected host[:container[:permissions]]")),
        };

        if !host.starts_with('/') {
            return Err(invalid("host path must be absolute"));
        }
        if !container.starts_with('/') {
            return Err(invalid("container path must be absolute"));
        }

        Ok(Self {
            host_path: host.to_owned(),
            container_path: container.to_owned(),
            permissions: permissions.to_owned(),
        })
    }
}

/// Whether `mode` is a non-empty, duplicate-free combination of `r`, `w`, `m`.
pub fn validate_device_mode(mode: &str) -> bool {
    if mode.is_empty() {
        return false;
    }
    let mut seen = [false; 3];
    for c in mode.chars() {
        let slot = match c {
            'r' => 0,
            'w' => 1,
            'm' => 2,
            _ => return false,
        };
        if seen[slot] {
            return false;
        }
        seen[slot] = true;
    }
    true
}

/// A host device node translated into its spec entry and cgroup allow rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    pub device: LinuxDevice,
    pub rule: LinuxDeviceCgroup,
}

/// Stat `host_path` (following symlinks) and describe it as a device that
/// appears at `container_path` with `permissions` in the device cgroup.
pub fn resolve_device_node(
    host_path: &str,
    container_path: &str,
    permissions: &str,
) -> Result<ResolvedDevice, RuntimeError> {
    let meta = stat(host_path)?;
    let file_type = meta.file_type();
    let typ = if file_type.is_char_device() {
        LinuxDeviceType::Char
    } else if file_type.is_block_device() {
        LinuxDeviceType::Block
    } else {
        return Err(RuntimeError::InvalidDevice {
            spec: host_path.to_owned(),
            reason: "not a character or block device".to_owned(),
        });
    };
    let (major, minor) = split_rdev(meta.rdev());

    Ok(ResolvedDevice {
        device: LinuxDevice {
            path: container_path.to_owned(),
            typ,
            major,
            minor,
            file_mode: Some(meta.mode() & 0o777),
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
        },
        rule: LinuxDeviceCgroup {
            allow: true,
            typ: Some(typ.as_str().to_owned()),
            major: Some(major),
            minor: Some(minor),
            access: Some(permissions.to_owned()),
        },
    })
}

/// Major and minor numbers of the block device at `path`.
pub fn resolve_block_device(path: &str) -> Result<(i64, i64), RuntimeError> {
    let meta = stat(path)?;
    if !meta.file_type().is_block_device() {
        return Err(RuntimeError::InvalidDevice {
            spec: path.to_owned(),
            reason: "not a block device".to_owned(),
        });
    }
    Ok(split_rdev(meta.rdev()))
}

fn stat(path: &str) -> Result<fs::Metadata, RuntimeError> {
    fs::metadata(Path::new(path)).map_err(|source| RuntimeError::DeviceResolution {
        path: path.to_owned(),
        source,
    })
}

fn split_rdev(rdev: u64) -> (i64, i64) {
    (i64::from(libc::major(rdev)), i64::from(libc::minor(rdev)))
}

/// Host lookups the synthesizer needs for devices.
pub trait DeviceResolver: Send + Sync {
    fn device_node(
        &self,
        host_path: &str,
        container_path: &str,
        permissions: &str,
    ) -> Result<ResolvedDevice, RuntimeError>;

    fn block_device(&self, path: &str) -> Result<(i64, i64), RuntimeError>;
}

/// Resolves devices by stat'ing the live host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDevices;

impl DeviceResolver for HostDevices {
    fn device_node(
        &self,
        host_path: &str,
        container_path: &str,
        permissions: &str,
    ) -> Result<ResolvedDevice, RuntimeError> {
        resolve_device_node(host_path, container_path, permissions)
    }

    fn block_device(&self, path: &str) -> Result<(i64, i64), RuntimeError> {
        resolve_block_device(path)
    }
}
