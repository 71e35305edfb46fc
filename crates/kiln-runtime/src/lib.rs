//! Runtime-spec synthesis for kiln.
//!
//! This crate turns a `CreateConfig` into an OCI runtime specification. The
//! pipeline is: probe the host's cgroup controllers (`probe`), validate and
//! clamp the requested resource limits against them (`validate`), resolve the
//! namespace directives against the container registry (`namespace`), then run
//! the ordered synthesis steps (`synth`). Device, mount, capability, seccomp,
//! port and rlimit handling each live in their own module so they can be
//! exercised without building a full config.

pub mod annotations;
pub mod capabilities;
pub mod cpuset;
pub mod devices;
pub mod mounts;
pub mod namespace;
pub mod oci;
pub mod ports;
pub mod probe;
pub mod process;
pub mod registry;
pub mod seccomp;
pub mod synth;
pub mod template;
pub mod validate;

pub use cpuset::CpuSet;
pub use devices::{
    resolve_block_device, resolve_device_node, validate_device_mode, DeviceResolver, HostDevices,
};
pub use mounts::{ChconRelabel, Relabel};
pub use namespace::{resolve, resolve_all, NamespaceKind, NamespaceMode, NamespaceModes};
pub use oci::RuntimeSpec;
pub use ports::{PortMapping, Protocol};
pub use probe::{probe, probe_root, CgroupLayout, HostCapabilities};
pub use registry::{ContainerHandle, ContainerLookup, LookupError, StaticRegistry};
pub use synth::{generate, Output, Synthesis, Synthesizer};
pub use validate::{validate, Validated};

use kiln_schema::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid resource configuration: {0}")]
    InvalidResource(String),
    #[error("invalid {kind} namespace mode '{value}'")]
    InvalidNamespaceMode { kind: NamespaceKind, value: String },
    #[error("container '{reference}' not found: {reason}")]
    ContainerNotFound { reference: String, reason: String },
    #[error("container '{0}' is not running")]
    ContainerNotRunning(String),
    #[error("invalid device '{spec}': {reason}")]
    InvalidDevice { spec: String, reason: String },
    #[error("cannot resolve device '{path}': {source}")]
    DeviceResolution {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid mount '{spec}': {reason}")]
    InvalidMount { spec: String, reason: String },
    #[error("invalid ulimit '{spec}': {reason}")]
    InvalidUlimit { spec: String, reason: String },
    #[error("sysctl '{key}' is not allowed: {reason}")]
    InvalidSysctl { key: String, reason: String },
    #[error("invalid port specification '{spec}': {reason}")]
    InvalidPort { spec: String, reason: String },
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),
    #[error("{0}")]
    Seccomp(String),
    #[error("invalid id mapping '{spec}': {reason}")]
    InvalidIdMapping { spec: String, reason: String },
    #[error("invalid process configuration: {0}")]
    InvalidProcess(String),
    #[error("relabeling '{path}' failed: {reason}")]
    Relabel { path: String, reason: String },
    #[error("failed to serialize runtime spec: {0}")]
    Serialization(#[from] serde_json::Error),
}
