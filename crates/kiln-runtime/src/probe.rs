//! Host capability probing.
//!
//! Inspects the cgroup hierarchy to learn which resource controls the running
//! kernel honours. Nothing here can fail: an unreadable file or a missing
//! controller simply marks that capability unsupported.

use crate::cpuset::CpuSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupLayout {
    V1,
    V2,
    None,
}

/// Snapshot of the resource controls available on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct HostCapabilities {
    pub cgroup_layout: CgroupLayout,
    pub memory_limit: bool,
    pub swap_limit: bool,
    pub memory_reservation: bool,
    pub memory_swappiness: bool,
    pub kernel_memory: bool,
    pub oom_kill_disable: bool,
    pub pids_limit: bool,
    pub cpu_shares: bool,
    pub cpu_cfs_period: bool,
    pub cpu_cfs_quota: bool,
    pub cpu_realtime: bool,
    pub cpuset: bool,
    pub blkio_weight: bool,
    pub blkio_weight_device: bool,
    pub blkio_read_bps: bool,
    pub blkio_write_bps: bool,
    pub blkio_read_iops: bool,
    pub blkio_write_iops: bool,
    /// CPUs a cpuset request may draw from.
    pub cpus: CpuSet,
    /// Memory nodes a cpuset request may draw from.
    pub mems: CpuSet,
}

impl HostCapabilities {
    /// A host with no usable cgroup controllers.
    pub fn unsupported() -> Self {
        Self {
            cgroup_layout: CgroupLayout::None,
            memory_limit: false,
            swap_limit: false,
            memory_reservation: false,
            memory_swappiness: false,
            kernel_memory: false,
            oom_kill_disable: false,
            pids_limit: false,
            cpu_shares: false,
            cpu_cfs_period: false,
            cpu_cfs_quota: false,
            cpu_realtime: false,
            cpuset: false,
            blkio_weight: false,
            blkio_weight_device: false,
            blkio_read_bps: false,
            blkio_write_bps: false,
            blkio_read_iops: false,
            blkio_write_iops: false,
            cpus: CpuSet::default(),
            mems: CpuSet::default(),
        }
    }

    /// A cgroup v1 host with every controller feature present.
    pub fn all_supported(cpus: CpuSet, mems: CpuSet) -> Self {
        Self {
            cgroup_layout: CgroupLayout::V1,
            memory_limit: true,
            swap_limit: true,
            memory_reservation: true,
            memory_swappiness: true,
            kernel_memory: true,
            oom_kill_disable: true,
            pids_limit: true,
            cpu_shares: true,
            cpu_cfs_period: true,
            cpu_cfs_quota: true,
            cpu_realtime: true,
            cpuset: true,
            blkio_weight: true,
            blkio_weight_device: true,
            blkio_read_bps: true,
            blkio_write_bps: true,
            blkio_read_iops: true,
            blkio_write_iops: true,
            cpus,
            mems,
        }
    }

    /// Feature flags as `(name, supported)` pairs, in a stable order.
    pub fn features(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("memory limit", self.memory_limit),
            ("swap limit", self.swap_limit),
            ("memory reservation", self.memory_reservation),
            ("memory swappiness", self.memory_swappiness),
            ("kernel memory limit", self.kernel_memory),
            ("oom killer disable", self.oom_kill_disable),
            ("pids limit", self.pids_limit),
            ("cpu shares", self.cpu_shares),
            ("cpu cfs period", self.cpu_cfs_period),
            ("cpu cfs quota", self.cpu_cfs_quota),
            ("cpu realtime", self.cpu_realtime),
            ("cpuset", self.cpuset),
            ("blkio weight", self.blkio_weight),
            ("blkio weight device", self.blkio_weight_device),
            ("blkio read bps", self.blkio_read_bps),
            ("blkio write bps", self.blkio_write_bps),
            ("blkio read iops", self.blkio_read_iops),
            ("blkio write iops", self.blkio_write_iops),
        ]
    }
}

/// Probe the live host.
pub fn probe() -> HostCapabilities {
    probe_root(Path::new("/"))
}

/// Probe a host whose filesystem is rooted at `root`.
pub fn probe_root(root: &Path) -> HostCapabilities {
    let cgroup_root = root.join("sys/fs/cgroup");

    let mut caps = if cgroup_root.join("cgroup.controllers").is_file() {
        probe_v2(root, &cgroup_root)
    } else if V1_CONTROLLERS.iter().any(|c| cgroup_root.join(c).is_dir()) {
        probe_v1(&cgroup_root)
    } else {
        debug!("no cgroup hierarchy found under {}", cgroup_root.display());
        HostCapabilities::unsupported()
    };

    if caps.cpus.is_empty() {
        caps.cpus = read_list(&root.join("sys/devices/system/cpu/online"));
    }
    if caps.mems.is_empty() {
        caps.mems = read_list(&root.join("sys/devices/system/node/online"));
    }

    debug!(
        "host capabilities: layout={:?} cpus={} mems={}",
        caps.cgroup_layout, caps.cpus, caps.mems
    );
    caps
}

const V1_CONTROLLERS: &[&str] = &["memory", "cpu", "cpuset", "blkio", "pids"];

fn probe_v2(root: &Path, cgroup_root: &Path) -> HostCapabilities {
    let own = own_cgroup_v2(root, cgroup_root);
    let controllers: BTreeSet<String> = fs::read_to_string(own.join("cgroup.controllers"))
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default();
    debug!("cgroup v2 controllers at {}: {controllers:?}", own.display());

    let has = |name: &str| controllers.contains(name);
    let memory = has("memory");
    let cpu = has("cpu");
    let io = has("io");

    let mut caps = HostCapabilities::unsupported();
    caps.cgroup_layout = CgroupLayout::V2;
    caps.memory_limit = memory;
    caps.memory_reservation = memory;
    caps.swap_limit = memory && (own == cgroup_root || own.join("memory.swap.max").exists());
    caps.pids_limit = has("pids");
    caps.cpu_shares = cpu;
    caps.cpu_cfs_period = cpu;
    caps.cpu_cfs_quota = cpu;
    caps.cpuset = has("cpuset");
    caps.blkio_weight = io;
    caps.blkio_weight_device = io;
    caps.blkio_read_bps = io;
    caps.blkio_write_bps = io;
    caps.blkio_read_iops = io;
    caps.blkio_write_iops = io;

    if caps.cpuset {
        caps.cpus = read_first_list(&[
            own.join("cpuset.cpus.effective"),
            cgroup_root.join("cpuset.cpus.effective"),
        ]);
        caps.mems = read_first_list(&[
            own.join("cpuset.mems.effective"),
            cgroup_root.join("cpuset.mems.effective"),
        ]);
    }
    caps
}

/// The process's own cgroup directory, from the `0::` line of
/// `/proc/self/cgroup`. Falls back to the hierarchy root.
fn own_cgroup_v2(root: &Path, cgroup_root: &Path) -> PathBuf {
    fs::read_to_string(root.join("proc/self/cgroup"))
        .ok()
        .and_then(|content| {
            content
                .lines()
                .find_map(|line| line.strip_prefix("0::"))
                .map(|rel| cgroup_root.join(rel.trim().trim_start_matches('/')))
        })
        .filter(|dir| dir.join("cgroup.controllers").is_file())
        .unwrap_or_else(|| cgroup_root.to_path_buf())
}

fn probe_v1(cgroup_root: &Path) -> HostCapabilities {
    let memory = cgroup_root.join("memory");
    let cpu = cgroup_root.join("cpu");
    let cpuset = cgroup_root.join("cpuset");
    let blkio = cgroup_root.join("blkio");

    let mut caps = HostCapabilities::unsupported();
    caps.cgroup_layout = CgroupLayout::V1;

    caps.memory_limit = memory.join("memory.limit_in_bytes").exists();
    if caps.memory_limit {
        caps.swap_limit = memory.join("memory.memsw.limit_in_bytes").exists();
        caps.memory_reservation = memory.join("memory.soft_limit_in_bytes").exists();
        caps.memory_swappiness = memory.join("memory.swappiness").exists();
        caps.kernel_memory = memory.join("memory.kmem.limit_in_bytes").exists();
        caps.oom_kill_disable = memory.join("memory.oom_control").exists();
    } else {
        debug!("memory cgroup not mounted or missing memory.limit_in_bytes");
    }

    caps.cpu_shares = cpu.join("cpu.shares").exists();
    caps.cpu_cfs_period = cpu.join("cpu.cfs_period_us").exists();
    caps.cpu_cfs_quota = cpu.join("cpu.cfs_quota_us").exists();
    caps.cpu_realtime =
        cpu.join("cpu.rt_period_us").exists() && cpu.join("cpu.rt_runtime_us").exists();

    caps.cpuset = cpuset.join("cpuset.cpus").exists() && cpuset.join("cpuset.mems").exists();
    if caps.cpuset {
        caps.cpus = read_list(&cpuset.join("cpuset.cpus"));
        caps.mems = read_list(&cpuset.join("cpuset.mems"));
    }

    caps.pids_limit = cgroup_root.join("pids").is_dir();

    caps.blkio_weight = blkio.join("blkio.weight").exists();
    caps.blkio_weight_device = blkio.join("blkio.weight_device").exists();
    caps.blkio_read_bps = blkio.join("blkio.throttle.read_bps_device").exists();
    caps.blkio_write_bps = blkio.join("blkio.throttle.write_bps_device").exists();
    caps.blkio_read_iops = blkio.join("blkio.throttle.read_iops_device").exists();
    caps.blkio_write_iops = blkio.join("blkio.throttle.write_iops_device").exists();

    caps
}

fn read_first_list(candidates: &[PathBuf]) -> CpuSet {
    candidates
        .iter()
        .map(|p| read_list(p))
        .find(|set| !set.is_empty())
        .unwrap_or_default()
}

fn read_list(path: &Path) -> CpuSet {
    match fs::read_to_string(path) {
        Ok(content) => content.parse().unwrap_or_else(|e| {
            debug!("ignoring {}: {e}", path.display());
            CpuSet::default()
        }),
        Err(_) => CpuSet::default(),
    }
}
