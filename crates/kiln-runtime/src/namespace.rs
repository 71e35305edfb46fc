//! Namespace directive parsing and resolution.
//!
//! Each shareable namespace kind carries a directive string such as `host`,
//! `private`, `none` or `container:<ref>`. Parsing is syntactic and
//! kind-aware; `container:` references are then resolved against the
//! container registry.

use crate::oci::LinuxNamespaceType;
use crate::registry::{ContainerHandle, ContainerLookup};
use crate::RuntimeError;
use kiln_schema::NamespaceOptions;
use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    Pid,
    Net,
    Ipc,
    Uts,
    User,
}

impl NamespaceKind {
    pub const ALL: [NamespaceKind; 5] = [Self::Pid, Self::Net, Self::Ipc, Self::Uts, Self::User];

    /// File name under `/proc/<pid>/ns/`.
    pub fn proc_name(self) -> &'static str {
        match self {
            Self::Pid => "pid",
            Self::Net => "net",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::User => "user",
        }
    }

    pub fn oci_type(self) -> LinuxNamespaceType {
        match self {
            Self::Pid => LinuxNamespaceType::Pid,
            Self::Net => LinuxNamespaceType::Network,
            Self::Ipc => LinuxNamespaceType::Ipc,
            Self::Uts => LinuxNamespaceType::Uts,
            Self::User => LinuxNamespaceType::User,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceMode {
    /// Share the host's namespace.
    Host,
    /// No namespace at all; network only.
    None,
    /// A fresh namespace created by the runtime.
    Private,
    /// Join a running peer container's namespace.
    Container(ContainerHandle),
}

impl NamespaceMode {
    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container(_))
    }
}

enum Directive<'a> {
    Host,
    None,
    Private,
    Container(&'a str),
}

fn parse(raw: &str, kind: NamespaceKind) -> Result<Directive<'_>, RuntimeError> {
    let invalid = || RuntimeError::InvalidNamespaceMode {
        kind,
        value: raw.to_owned(),
    };

    if let Some((prefix, reference)) = raw.split_once(':') {
        if prefix != "container" || reference.is_empty() {
            return Err(invalid());
        }
        return Ok(Directive::Container(reference));
    }

    match (raw, kind) {
        ("" | "host", _) => Ok(Directive::Host),
        ("private", _) => Ok(Directive::Private),
        ("none", NamespaceKind::Net) => Ok(Directive::None),
        // "bridge" or a user-defined network name
        (_, NamespaceKind::Net) => Ok(Directive::Private),
        _ => Err(invalid()),
    }
}

/// Resolve one namespace directive.
pub fn resolve(
    raw: &str,
    kind: NamespaceKind,
    registry: &dyn ContainerLookup,
) -> Result<NamespaceMode, RuntimeError> {
    let mode = match parse(raw, kind)? {
        Directive::Host => NamespaceMode::Host,
        Directive::None => NamespaceMode::None,
        Directive::Private => NamespaceMode::Private,
        Directive::Container(reference) => {
            let handle =
                registry
                    .lookup(reference)
                    .map_err(|e| RuntimeError::ContainerNotFound {
                        reference: reference.to_owned(),
                        reason: e.to_string(),
                    })?;
            if !handle.is_running() {
                return Err(RuntimeError::ContainerNotRunning(reference.to_owned()));
            }
            debug!(
                "{kind} namespace joins container {} at {}",
                handle.id,
                handle.namespace_path(kind)
            );
            NamespaceMode::Container(handle)
        }
    };
    Ok(mode)
}

/// Resolved modes for every shareable namespace kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceModes {
    pub pid: NamespaceMode,
    pub net: NamespaceMode,
    pub ipc: NamespaceMode,
    pub uts: NamespaceMode,
    pub user: NamespaceMode,
}

impl Default for NamespaceModes {
    fn default() -> Self {
        Self {
            pid: NamespaceMode::Private,
            net: NamespaceMode::Private,
            ipc: NamespaceMode::Private,
            uts: NamespaceMode::Private,
            user: NamespaceMode::Private,
        }
    }
}

impl NamespaceModes {
    pub fn get(&self, kind: NamespaceKind) -> &NamespaceMode {
        match kind {
            NamespaceKind::Pid => &self.pid,
            NamespaceKind::Net => &self.net,
            NamespaceKind::Ipc => &self.ipc,
            NamespaceKind::Uts => &self.uts,
            NamespaceKind::User => &self.user,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NamespaceKind, &NamespaceMode)> {
        NamespaceKind::ALL.into_iter().map(|kind| (kind, self.get(kind)))
    }
}

/// Resolve all five directives of a config.
pub fn resolve_all(
    opts: &NamespaceOptions,
    registry: &dyn ContainerLookup,
) -> Result<NamespaceModes, RuntimeError> {
    Ok(NamespaceModes {
        pid: resolve(&opts.pid, NamespaceKind::Pid, registry)?,
        net: resolve(&opts.net, NamespaceKind::Net, registry)?,
        ipc: resolve(&opts.ipc, NamespaceKind::Ipc, registry)?,
        uts: resolve(&opts.uts, NamespaceKind::Uts, registry)?,
        user: resolve(&opts.user, NamespaceKind::User, registry)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;

    fn registry() -> StaticRegistry {
        StaticRegistry::from_handles([
            ContainerHandle::new("c0ffee", "web", 311),
            ContainerHandle::new("dead00", "stopped", 0),
        ])
    }

    #[test]
    fn host_private_and_none() {
        let reg = registry();
        for kind in NamespaceKind::ALL {
            assert_eq!(resolve("host", kind, &reg).unwrap(), NamespaceMode::Host);
            assert_eq!(resolve("", kind, &reg).unwrap(), NamespaceMode::Host);
            assert_eq!(resolve("private", kind, &reg).unwrap(), NamespaceMode::Private);
        }
        assert_eq!(resolve("none", NamespaceKind::Net, &reg).unwrap(), NamespaceMode::None);
        assert_eq!(resolve("bridge", NamespaceKind::Net, &reg).unwrap(), NamespaceMode::Private);
        assert_eq!(resolve("backend", NamespaceKind::Net, &reg).unwrap(), NamespaceMode::Private);
    }

    #[test]
    fn network_only_words_are_invalid_elsewhere() {
        let reg = registry();
        for raw in ["none", "bridge"] {
            let err = resolve(raw, NamespaceKind::Pid, &reg).unwrap_err();
            assert!(err.to_string().contains(raw));
        }
    }

    #[test]
    fn container_reference_round_trips() {
        let reg = registry();
        let mode = resolve("container:web", NamespaceKind::Ipc, &reg).unwrap();
        match mode {
            NamespaceMode::Container(handle) => {
                assert_eq!(handle.id, "c0ffee");
                assert_eq!(handle.namespace_path(NamespaceKind::Ipc), "/proc/311/ns/ipc");
            }
            other => panic!("expected container mode, got {other:?}"),
        }
    }

    #[test]
    fn unknown_container_never_falls_back() {
        let reg = registry();
        let err = resolve("container:ghost", NamespaceKind::Net, &reg).unwrap_err();
        assert!(matches!(err, RuntimeError::ContainerNotFound { .. }));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn stopped_container_is_rejected() {
        let reg = registry();
        let err = resolve("container:stopped", NamespaceKind::Pid, &reg).unwrap_err();
        assert!(matches!(err, RuntimeError::ContainerNotRunning(_)));
    }

    #[test]
    fn bad_prefixes_are_syntax_errors() {
        let reg = registry();
        for raw in ["ns:/proc/1/ns/net", "container:", "pod:abc"] {
            let err = resolve(raw, NamespaceKind::Net, &reg).unwrap_err();
            assert!(matches!(err, RuntimeError::InvalidNamespaceMode { .. }), "{raw}");
        }
    }

    #[test]
    fn resolve_all_defaults_to_private() {
        let modes = resolve_all(&NamespaceOptions::default(), &registry()).unwrap();
        assert_eq!(modes, NamespaceModes::default());
        assert_eq!(modes.iter().count(), 5);
    }
}
