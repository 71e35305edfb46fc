use crate::namespace::NamespaceKind;
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// What the resolver needs to know about a peer container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Init process pid; 0 when the container is not running.
    #[serde(default)]
    pub pid: u32,
}

impl ContainerHandle {
    pub fn new(id: &str, name: &str, pid: u32) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            pid,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid != 0
    }

    /// Path of this container's namespace file for `kind`.
    pub fn namespace_path(&self, kind: NamespaceKind) -> String {
        format!("/proc/{}/ns/{}", self.pid, kind.proc_name())
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no container with name or id '{0}'")]
    NotFound(String),
    #[error("'{0}' matches more than one container")]
    Ambiguous(String),
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the engine's container database.
pub trait ContainerLookup: Send + Sync {
    fn lookup(&self, name_or_id: &str) -> Result<ContainerHandle, LookupError>;
}

/// In-memory registry keyed by container id.
///
/// Lookups match an exact id, then an exact name, then a unique id prefix.
#[derive(Debug)]
pub struct StaticRegistry {
    containers: Mutex<BTreeMap<String, ContainerHandle>>,
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self {
            containers: Mutex::new(BTreeMap::new()),
        }
    }
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_handles(handles: impl IntoIterator<Item = ContainerHandle>) -> Self {
        Self {
            containers: Mutex::new(handles.into_iter().map(|h| (h.id.clone(), h)).collect()),
        }
    }

    /// Load a JSON array of handles.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        let handles: Vec<ContainerHandle> = serde_json::from_str(&content)?;
        Ok(Self::from_handles(handles))
    }

    pub fn register(&self, handle: ContainerHandle) -> Result<(), LookupError> {
        let mut containers = self
            .containers
            .lock()
            .map_err(|e| LookupError::Unavailable(format!("mutex poisoned: {e}")))?;
        containers.insert(handle.id.clone(), handle);
        Ok(())
    }
}

impl ContainerLookup for StaticRegistry {
    fn lookup(&self, name_or_id: &str) -> Result<ContainerHandle, LookupError> {
        let containers = self
            .containers
            .lock()
            .map_err(|e| LookupError::Unavailable(format!("mutex poisoned: {e}")))?;

        if let Some(handle) = containers.get(name_or_id) {
            return Ok(handle.clone());
        }
        if let Some(handle) = containers.values().find(|h| h.name == name_or_id) {
            return Ok(handle.clone());
        }

        let mut prefixed = containers
            .values()
            .filter(|h| h.id.starts_with(name_or_id));
        match (prefixed.next(), prefixed.next()) {
            (Some(handle), None) => Ok(handle.clone()),
            (Some(_), Some(_)) => Err(LookupError::Ambiguous(name_or_id.to_owned())),
            _ => Err(LookupError::NotFound(name_or_id.to_owned())),
        }
    }
}
