//! Create-config data model and config-file parsing for kiln.
//!
//! This crate defines the input side of the compiler: the `CreateConfig`
//! aggregate that describes one container creation request, its
//! `ResourceLimits`, the per-device blkio entries (`WeightDevice`,
//! `ThrottleDevice`), human-readable byte sizes, and TOML loading
//! (`parse_config_str`, `parse_config_file`). Nothing here touches the host.

pub mod config;
pub mod resources;
pub mod units;

pub use config::{
    parse_config_file, parse_config_str, ConfigError, CreateConfig, IdMappingOptions,
    NamespaceOptions, SecurityOptions, UserOptions,
};
pub use resources::{ResourceLimits, ThrottleDevice, WeightDevice, MIN_MEMORY};
pub use units::parse_bytes;
