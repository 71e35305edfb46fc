use crate::resources::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid size '{0}'")]
    InvalidSize(String),
    #[error("invalid weight device '{spec}': {reason}")]
    InvalidWeightDevice { spec: String, reason: String },
    #[error("invalid throttle device '{spec}': {reason}")]
    InvalidThrottleDevice { spec: String, reason: String },
}

/// One container creation request.
///
/// Every section is optional in the config file; omitted sections take the
/// defaults below. Maps are ordered so that anything derived from a config
/// is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreateConfig {
    pub command: Vec<String>,
    pub work_dir: String,
    pub env: BTreeMap<String, String>,
    pub tty: bool,
    pub hostname: String,
    pub rootfs: String,
    pub user: UserOptions,
    pub resources: ResourceLimits,
    pub namespaces: NamespaceOptions,
    pub id_mappings: IdMappingOptions,
    pub devices: Vec<String>,
    pub volumes: Vec<String>,
    pub tmpfs: Vec<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security: SecurityOptions,
    pub sysctl: BTreeMap<String, String>,
    pub ulimits: Vec<String>,
    pub publish: Vec<String>,
    pub expose: Vec<String>,
    pub annotations: BTreeMap<String, String>,
}

impl Default for CreateConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            work_dir: String::new(),
            env: BTreeMap::new(),
            tty: false,
            hostname: String::new(),
            rootfs: "rootfs".to_owned(),
            user: UserOptions::default(),
            resources: ResourceLimits::default(),
            namespaces: NamespaceOptions::default(),
            id_mappings: IdMappingOptions::default(),
            devices: Vec::new(),
            volumes: Vec::new(),
            tmpfs: Vec::new(),
            cap_add: Vec::new(),
            cap_drop: Vec::new(),
            security: SecurityOptions::default(),
            sysctl: BTreeMap::new(),
            ulimits: Vec::new(),
            publish: Vec::new(),
            expose: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserOptions {
    pub uid: u32,
    pub gid: u32,
    pub group_add: Vec<u32>,
}

/// Raw namespace directives, one per shareable kind.
///
/// Omitted directives default to `"private"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamespaceOptions {
    pub pid: String,
    pub net: String,
    pub ipc: String,
    pub uts: String,
    pub user: String,
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        let private = || "private".to_owned();
        Self {
            pid: private(),
            net: private(),
            ipc: private(),
            uts: private(),
            user: private(),
        }
    }
}

/// User-namespace id maps, each entry `container_id:host_id:size`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdMappingOptions {
    pub uid_map: Vec<String>,
    pub gid_map: Vec<String>,
}

impl IdMappingOptions {
    pub fn is_empty(&self) -> bool {
        self.uid_map.is_empty() && self.gid_map.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityOptions {
    pub privileged: bool,
    pub no_new_privileges: bool,
    pub read_only_rootfs: bool,
    /// `""` selects the built-in profile, `"unconfined"` disables filtering,
    /// anything else is a path to a JSON profile.
    pub seccomp_profile: String,
    pub apparmor_profile: String,
    pub process_label: String,
    pub mount_label: String,
}

pub fn parse_config_str(input: &str) -> Result<CreateConfig, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<CreateConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
