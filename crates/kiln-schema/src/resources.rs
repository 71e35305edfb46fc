use crate::config::ConfigError;
use crate::units::{deserialize_bytes, parse_bytes};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Smallest memory, reservation or kernel-memory limit the kernel honours.
pub const MIN_MEMORY: i64 = 4 * 1024 * 1024;

/// Requested cgroup resource limits for one container.
///
/// Zero means "not requested" for every numeric field except
/// `memory_swappiness`, where `-1` is the unset value, and `memory_swap`,
/// where `-1` means unlimited swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    #[serde(deserialize_with = "deserialize_bytes")]
    pub memory: i64,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub memory_reservation: i64,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub memory_swap: i64,
    pub memory_swappiness: i64,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub kernel_memory: i64,
    pub disable_oom_killer: bool,
    pub oom_score_adj: i32,
    pub cpu_shares: u64,
    pub cpu_quota: i64,
    pub cpu_period: u64,
    pub cpu_rt_runtime: i64,
    pub cpu_rt_period: u64,
    pub cpuset_cpus: String,
    pub cpuset_mems: String,
    pub cpus: f64,
    pub blkio_weight: u16,
    #[serde(deserialize_with = "deserialize_weight_devices")]
    pub blkio_weight_device: Vec<WeightDevice>,
    #[serde(deserialize_with = "deserialize_bps_devices")]
    pub device_read_bps: Vec<ThrottleDevice>,
    #[serde(deserialize_with = "deserialize_bps_devices")]
    pub device_write_bps: Vec<ThrottleDevice>,
    #[serde(deserialize_with = "deserialize_iops_devices")]
    pub device_read_iops: Vec<ThrottleDevice>,
    #[serde(deserialize_with = "deserialize_iops_devices")]
    pub device_write_iops: Vec<ThrottleDevice>,
    pub pids_limit: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: 0,
            memory_reservation: 0,
            memory_swap: 0,
            memory_swappiness: -1,
            kernel_memory: 0,
            disable_oom_killer: false,
            oom_score_adj: 0,
            cpu_shares: 0,
            cpu_quota: 0,
            cpu_period: 0,
            cpu_rt_runtime: 0,
            cpu_rt_period: 0,
            cpuset_cpus: String::new(),
            cpuset_mems: String::new(),
            cpus: 0.0,
            blkio_weight: 0,
            blkio_weight_device: Vec::new(),
            device_read_bps: Vec::new(),
            device_write_bps: Vec::new(),
            device_read_iops: Vec::new(),
            device_write_iops: Vec::new(),
            pids_limit: 0,
        }
    }
}

impl ResourceLimits {
    /// Whether any blkio weight or throttle field is set.
    pub fn has_block_io(&self) -> bool {
        self.blkio_weight != 0
            || !self.blkio_weight_device.is_empty()
            || !self.device_read_bps.is_empty()
            || !self.device_write_bps.is_empty()
            || !self.device_read_iops.is_empty()
            || !self.device_write_iops.is_empty()
    }
}

/// Relative blkio weight for a single block device, `path:weight`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightDevice {
    pub path: String,
    pub weight: u16,
}

impl FromStr for WeightDevice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidWeightDevice {
            spec: s.to_owned(),
            reason: reason.to_owned(),
        };
        let (path, weight) = split_device(s).ok_or_else(|| invalid("expected '<path>:<weight>'"))?;
        let weight = weight
            .parse::<u16>()
            .map_err(|_| invalid("weight must be an integer"))?;
        Ok(Self {
            path: path.to_owned(),
            weight,
        })
    }
}

/// Bandwidth or IOPS ceiling for a single block device, `path:rate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleDevice {
    pub path: String,
    pub rate: u64,
}

impl ThrottleDevice {
    /// Parse a bytes-per-second entry; the rate accepts size suffixes.
    pub fn parse_bps(s: &str) -> Result<Self, ConfigError> {
        let (path, rate) = split_device(s).ok_or_else(|| invalid_throttle(s, "expected '<path>:<rate>'"))?;
        let rate = parse_bytes(rate).map_err(|_| invalid_throttle(s, "rate must be a size"))?;
        let rate = u64::try_from(rate).map_err(|_| invalid_throttle(s, "rate must not be negative"))?;
        Ok(Self {
            path: path.to_owned(),
            rate,
        })
    }

    /// Parse an IO-operations-per-second entry; the rate is a plain integer.
    pub fn parse_iops(s: &str) -> Result<Self, ConfigError> {
        let (path, rate) = split_device(s).ok_or_else(|| invalid_throttle(s, "expected '<path>:<rate>'"))?;
        let rate = rate
            .parse::<u64>()
            .map_err(|_| invalid_throttle(s, "rate must be a non-negative integer"))?;
        Ok(Self {
            path: path.to_owned(),
            rate,
        })
    }
}

fn invalid_throttle(spec: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidThrottleDevice {
        spec: spec.to_owned(),
        reason: reason.to_owned(),
    }
}

fn split_device(s: &str) -> Option<(&str, &str)> {
    let (path, value) = s.rsplit_once(':')?;
    if !path.starts_with("/dev/") || value.is_empty() {
        return None;
    }
    Some((path, value))
}

fn deserialize_weight_devices<'de, D>(deserializer: D) -> Result<Vec<WeightDevice>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    raw.iter()
        .map(|s| s.parse().map_err(D::Error::custom))
        .collect()
}

fn deserialize_bps_devices<'de, D>(deserializer: D) -> Result<Vec<ThrottleDevice>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    raw.iter()
        .map(|s| ThrottleDevice::parse_bps(s).map_err(D::Error::custom))
        .collect()
}

fn deserialize_iops_devices<'de, D>(deserializer: D) -> Result<Vec<ThrottleDevice>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    raw.iter()
        .map(|s| ThrottleDevice::parse_iops(s).map_err(D::Error::custom))
        .collect()
}
