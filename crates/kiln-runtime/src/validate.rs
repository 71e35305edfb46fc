//! Resource-limit validation against host capabilities.
//!
//! Requests for controllers the host lacks are cleared with a warning; the
//! remaining values are then checked for range and cross-field consistency.
//! Clearing always happens before the checks that read a cleared field.

use crate::cpuset::CpuSet;
use crate::probe::HostCapabilities;
use crate::RuntimeError;
use kiln_schema::{ResourceLimits, MIN_MEMORY};
use serde::Serialize;
use tracing::warn;

pub const MIN_CPU_PERIOD: u64 = 1000;
pub const MAX_CPU_PERIOD: u64 = 1_000_000;
pub const MIN_CPU_QUOTA: i64 = 1000;
/// CFS period used when a fractional `cpus` value is converted to a quota.
pub const CPUS_PERIOD: u64 = 100_000;
pub const MIN_BLKIO_WEIGHT: u16 = 10;
pub const MAX_BLKIO_WEIGHT: u16 = 1000;

/// Normalized limits plus the advisory warnings produced while clamping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validated {
    pub limits: ResourceLimits,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct Warnings(Vec<String>);

impl Warnings {
    fn push(&mut self, msg: &str) {
        warn!("{msg}");
        self.0.push(msg.to_owned());
    }
}

fn invalid(msg: impl Into<String>) -> RuntimeError {
    RuntimeError::InvalidResource(msg.into())
}

/// Validate `requested` against `caps`.
///
/// `is_update` relaxes the rule that a swap limit needs a memory limit, since
/// an update may change swap alone.
pub fn validate(
    requested: &ResourceLimits,
    caps: &HostCapabilities,
    is_update: bool,
) -> Result<Validated, RuntimeError> {
    let mut limits = requested.clone();
    let mut warnings = Warnings::default();

    check_memory(&mut limits, caps, is_update, &mut warnings)?;
    clear_unsupported(&mut limits, caps, &mut warnings);
    check_cpu(&limits, caps)?;
    check_cpuset(&mut limits, caps, &mut warnings)?;
    check_blkio(&limits)?;

    Ok(Validated {
        limits,
        warnings: warnings.0,
    })
}

fn check_memory(
    r: &mut ResourceLimits,
    caps: &HostCapabilities,
    is_update: bool,
    warnings: &mut Warnings,
) -> Result<(), RuntimeError> {
    if r.memory != 0 && r.memory < MIN_MEMORY {
        return Err(invalid("minimum memory limit allowed is 4MB"));
    }
    if r.memory > 0 && !caps.memory_limit {
        warnings.push(
            "kernel does not support memory limits or the memory cgroup is not mounted; memory limit discarded",
        );
        r.memory = 0;
        r.memory_swap = -1;
    }
    if r.memory > 0 && r.memory_swap != -1 && !caps.swap_limit {
        warnings.push(
            "kernel does not support swap limits or the memory cgroup is not mounted; memory limited without swap",
        );
        r.memory_swap = -1;
    }
    if r.memory > 0 && r.memory_swap > 0 && r.memory_swap < r.memory {
        return Err(invalid(
            "memory+swap limit must be larger than the memory limit",
        ));
    }
    if r.memory == 0 && r.memory_swap > 0 && !is_update {
        return Err(invalid(
            "a memory limit is required when setting a memory+swap limit",
        ));
    }

    if r.memory_swappiness != -1 && !caps.memory_swappiness {
        warnings.push(&format!(
            "kernel does not support memory swappiness; swappiness {} discarded",
            r.memory_swappiness
        ));
        r.memory_swappiness = -1;
    } else if !(-1..=100).contains(&r.memory_swappiness) {
        return Err(invalid(format!(
            "invalid memory swappiness {}: valid range is 0-100",
            r.memory_swappiness
        )));
    }

    if r.memory_reservation > 0 && !caps.memory_reservation {
        warnings.push(
            "kernel does not support memory soft limits or the memory cgroup is not mounted; reservation discarded",
        );
        r.memory_reservation = 0;
    }
    if r.memory_reservation != 0 && r.memory_reservation < MIN_MEMORY {
        return Err(invalid("minimum memory reservation allowed is 4MB"));
    }
    if r.memory > 0 && r.memory_reservation > 0 && r.memory < r.memory_reservation {
        return Err(invalid(
            "memory limit can not be less than the memory reservation",
        ));
    }

    if r.kernel_memory > 0 && !caps.kernel_memory {
        warnings.push(
            "kernel does not support kernel memory limits or the memory cgroup is not mounted; kernel memory limit discarded",
        );
        r.kernel_memory = 0;
    }
    if r.kernel_memory != 0 && r.kernel_memory < MIN_MEMORY {
        return Err(invalid("minimum kernel memory limit allowed is 4MB"));
    }

    if !caps.oom_kill_disable {
        if r.disable_oom_killer {
            warnings.push("kernel does not support disabling the OOM killer; setting discarded");
        }
        r.disable_oom_killer = false;
    }
    Ok(())
}

fn clear_unsupported(r: &mut ResourceLimits, caps: &HostCapabilities, warnings: &mut Warnings) {
    if r.pids_limit != 0 && !caps.pids_limit {
        warnings.push("kernel does not support pids limits or the pids cgroup is not mounted; pids limit discarded");
        r.pids_limit = 0;
    }
    if r.cpu_shares > 0 && !caps.cpu_shares {
        warnings.push("kernel does not support CPU shares or the cpu cgroup is not mounted; shares discarded");
        r.cpu_shares = 0;
    }
    if r.cpu_period > 0 && !caps.cpu_cfs_period {
        warnings.push("kernel does not support CPU CFS period or the cpu cgroup is not mounted; period discarded");
        r.cpu_period = 0;
    }
    if r.cpu_quota > 0 && !caps.cpu_cfs_quota {
        warnings.push("kernel does not support CPU CFS quota or the cpu cgroup is not mounted; quota discarded");
        r.cpu_quota = 0;
    }
    if r.cpus > 0.0 && !(caps.cpu_cfs_period && caps.cpu_cfs_quota) {
        warnings.push("kernel does not support CPU CFS scheduling or the cpu cgroup is not mounted; cpus discarded");
        r.cpus = 0.0;
    }
    if (r.cpu_rt_period > 0 || r.cpu_rt_runtime != 0) && !caps.cpu_realtime {
        warnings.push("kernel does not support CPU real-time scheduling; real-time period and runtime discarded");
        r.cpu_rt_period = 0;
        r.cpu_rt_runtime = 0;
    }
    if r.blkio_weight > 0 && !caps.blkio_weight {
        warnings.push("kernel does not support block I/O weight or the blkio cgroup is not mounted; weight discarded");
        r.blkio_weight = 0;
    }
    if !r.blkio_weight_device.is_empty() && !caps.blkio_weight_device {
        warnings.push("kernel does not support block I/O weight_device or the blkio cgroup is not mounted; weight-device discarded");
        r.blkio_weight_device.clear();
    }
    if !r.device_read_bps.is_empty() && !caps.blkio_read_bps {
        warnings.push("kernel does not support block I/O read bps limits or the blkio cgroup is not mounted; read bps limit discarded");
        r.device_read_bps.clear();
    }
    if !r.device_write_bps.is_empty() && !caps.blkio_write_bps {
        warnings.push("kernel does not support block I/O write bps limits or the blkio cgroup is not mounted; write bps limit discarded");
        r.device_write_bps.clear();
    }
    if !r.device_read_iops.is_empty() && !caps.blkio_read_iops {
        warnings.push("kernel does not support block I/O read iops limits or the blkio cgroup is not mounted; read iops limit discarded");
        r.device_read_iops.clear();
    }
    if !r.device_write_iops.is_empty() && !caps.blkio_write_iops {
        warnings.push("kernel does not support block I/O write iops limits or the blkio cgroup is not mounted; write iops limit discarded");
        r.device_write_iops.clear();
    }
}

/// CFS quota for `cpus` CPUs over one [`CPUS_PERIOD`].
pub fn cpus_quota(cpus: f64) -> i64 {
    (cpus * CPUS_PERIOD as f64).round() as i64
}

fn check_cpu(r: &ResourceLimits, caps: &HostCapabilities) -> Result<(), RuntimeError> {
    if r.cpu_period != 0 && !(MIN_CPU_PERIOD..=MAX_CPU_PERIOD).contains(&r.cpu_period) {
        return Err(invalid(format!(
            "CPU CFS period {} must be between 1000 and 1000000 microseconds",
            r.cpu_period
        )));
    }
    if r.cpu_quota > 0 && r.cpu_quota < MIN_CPU_QUOTA {
        return Err(invalid(format!(
            "CPU CFS quota {} can not be less than 1000 microseconds",
            r.cpu_quota
        )));
    }
    if r.cpus.is_nan() || r.cpus < 0.0 {
        return Err(invalid(format!("cpus {} must not be negative", r.cpus)));
    }
    if r.cpus > 0.0 && cpus_quota(r.cpus) < MIN_CPU_QUOTA {
        return Err(invalid(format!(
            "cpus {} is below the minimum of 0.01 CPUs",
            r.cpus
        )));
    }
    if r.cpus > 0.0 && !caps.cpus.is_empty() && r.cpus > caps.cpus.len() as f64 {
        return Err(invalid(format!(
            "cpus {} exceeds the {} CPUs available on this host",
            r.cpus,
            caps.cpus.len()
        )));
    }
    Ok(())
}

fn check_cpuset(
    r: &mut ResourceLimits,
    caps: &HostCapabilities,
    warnings: &mut Warnings,
) -> Result<(), RuntimeError> {
    if r.cpuset_cpus.is_empty() && r.cpuset_mems.is_empty() {
        return Ok(());
    }
    if !caps.cpuset {
        warnings.push("kernel does not support cpusets or the cpuset cgroup is not mounted; cpuset discarded");
        r.cpuset_cpus.clear();
        r.cpuset_mems.clear();
        return Ok(());
    }

    check_subset(&r.cpuset_cpus, &caps.cpus, "cpuset cpus", "CPUs")?;
    check_subset(&r.cpuset_mems, &caps.mems, "cpuset mems", "memory nodes")
}

fn check_subset(
    requested: &str,
    available: &CpuSet,
    field: &str,
    what: &str,
) -> Result<(), RuntimeError> {
    if requested.is_empty() {
        return Ok(());
    }
    let set: CpuSet = requested
        .parse()
        .map_err(|_| invalid(format!("invalid value '{requested}' for {field}")))?;
    if !set.is_subset_of(available) {
        return Err(invalid(format!(
            "requested {what} are not available: requested {requested}, available {available}"
        )));
    }
    Ok(())
}

fn check_blkio(r: &ResourceLimits) -> Result<(), RuntimeError> {
    let in_range = |w: u16| (MIN_BLKIO_WEIGHT..=MAX_BLKIO_WEIGHT).contains(&w);
    if r.blkio_weight != 0 && !in_range(r.blkio_weight) {
        return Err(invalid(format!(
            "blkio weight {} is outside the range 10 to 1000",
            r.blkio_weight
        )));
    }
    for dev in &r.blkio_weight_device {
        if !in_range(dev.weight) {
            return Err(invalid(format!(
                "blkio weight {} for device {} is outside the range 10 to 1000",
                dev.weight, dev.path
            )));
        }
    }
    Ok(())
}
