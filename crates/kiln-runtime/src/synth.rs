//! Runtime-spec synthesis.
//!
//! A spec is built by threading the default template through a fixed list of
//! named steps. Each step reads the immutable [`Context`] and returns the
//! updated document, so a failing step aborts synthesis without leaving a
//! partial spec behind.

use crate::annotations;
use crate::capabilities::capability_set;
use crate::devices::{DeviceRequest, DeviceResolver, HostDevices};
use crate::mounts::{
    cgroup_mount, privileged_sysfs_mount, BindMountSpec, ChconRelabel, Relabel, TmpfsSpec,
    CGROUP_MOUNT,
};
use crate::namespace::{resolve_all, NamespaceKind, NamespaceMode, NamespaceModes};
use crate::oci::{
    LinuxBlockIo, LinuxCapabilities, LinuxCpu, LinuxDeviceCgroup, LinuxIdMapping, LinuxMemory,
    LinuxNamespace, LinuxPids, LinuxThrottleDevice, LinuxWeightDevice, Mount, Root, RuntimeSpec,
};
use crate::ports::{parse_expose, parse_port_spec, PortMapping};
use crate::probe::HostCapabilities;
use crate::process::{apply_ulimits, merge_env, parse_id_mappings, validate_sysctl};
use crate::registry::ContainerLookup;
use crate::seccomp::{compile, default_profile, load_profile, native_arch, UNCONFINED};
use crate::template::default_spec;
use crate::validate::{cpus_quota, validate, Validated, CPUS_PERIOD};
use crate::RuntimeError;
use kiln_schema::{CreateConfig, ResourceLimits, ThrottleDevice};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

const MASKED_PATHS: &[&str] = &[
    "/proc/acpi",
    "/proc/kcore",
    "/proc/keys",
    "/proc/latency_stats",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/sched_debug",
    "/proc/scsi",
    "/sys/firmware",
];

const READONLY_PATHS: &[&str] = &[
    "/proc/asound",
    "/proc/bus",
    "/proc/fs",
    "/proc/irq",
    "/proc/sys",
    "/proc/sysrq-trigger",
];

/// Everything a step may read.
pub struct Context<'a> {
    pub config: &'a CreateConfig,
    pub limits: &'a ResourceLimits,
    pub namespaces: &'a NamespaceModes,
    devices: &'a dyn DeviceResolver,
    relabel: &'a dyn Relabel,
}

type Step = fn(&Context<'_>, RuntimeSpec) -> Result<RuntimeSpec, RuntimeError>;

const PIPELINE: &[(&str, Step)] = &[
    ("process", process),
    ("resources", resources),
    ("cpus", cpus),
    ("namespaces", namespaces),
    ("kernel filesystems", kernel_filesystems),
    ("devices", devices),
    ("capabilities", capabilities),
    ("seccomp", seccomp),
    ("mounts", mounts),
    ("block-io", block_io),
    ("annotations", annotations),
];

/// A synthesized spec plus the port mappings the network layer must set up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Synthesis {
    pub spec: RuntimeSpec,
    pub port_mappings: Vec<PortMapping>,
}

/// Result of the full generate pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    pub spec: RuntimeSpec,
    pub port_mappings: Vec<PortMapping>,
    pub warnings: Vec<String>,
}

pub struct Synthesizer {
    devices: Box<dyn DeviceResolver>,
    relabel: Box<dyn Relabel>,
}

impl Synthesizer {
    pub fn new(devices: Box<dyn DeviceResolver>, relabel: Box<dyn Relabel>) -> Self {
        Self { devices, relabel }
    }

    /// A synthesizer that stats the live host and relabels with `chcon`.
    pub fn host() -> Self {
        Self::new(Box::new(HostDevices), Box::new(ChconRelabel))
    }

    /// Build a spec from already validated limits and resolved namespaces.
    pub fn synthesize(
        &self,
        config: &CreateConfig,
        limits: &ResourceLimits,
        namespaces: &NamespaceModes,
    ) -> Result<Synthesis, RuntimeError> {
        let ctx = Context {
            config,
            limits,
            namespaces,
            devices: self.devices.as_ref(),
            relabel: self.relabel.as_ref(),
        };

        let port_mappings = port_mappings(&ctx)?;
        let mut spec = default_spec();
        for (name, step) in PIPELINE {
            debug!("synthesis step: {name}");
            spec = step(&ctx, spec)?;
        }
        Ok(Synthesis {
            spec,
            port_mappings,
        })
    }

    /// Validate, resolve and synthesize in one go.
    pub fn generate(
        &self,
        config: &CreateConfig,
        caps: &HostCapabilities,
        registry: &dyn ContainerLookup,
        is_update: bool,
    ) -> Result<Output, RuntimeError> {
        let Validated { limits, warnings } = validate(&config.resources, caps, is_update)?;
        let namespaces = resolve_all(&config.namespaces, registry)?;
        let Synthesis {
            spec,
            port_mappings,
        } = self.synthesize(config, &limits, &namespaces)?;
        info!(
            "generated runtime spec: {} mounts, {} port mappings, {} warnings",
            spec.mounts.len(),
            port_mappings.len(),
            warnings.len()
        );
        Ok(Output {
            spec,
            port_mappings,
            warnings,
        })
    }
}

/// [`Synthesizer::generate`] against the live host.
pub fn generate(
    config: &CreateConfig,
    caps: &HostCapabilities,
    registry: &dyn ContainerLookup,
    is_update: bool,
) -> Result<Output, RuntimeError> {
    Synthesizer::host().generate(config, caps, registry, is_update)
}

fn process(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    let cfg = ctx.config;
    if cfg.command.is_empty() {
        return Err(RuntimeError::InvalidProcess("no command specified".to_owned()));
    }
    let cwd = if cfg.work_dir.is_empty() {
        "/"
    } else {
        cfg.work_dir.as_str()
    };
    if !cwd.starts_with('/') {
        return Err(RuntimeError::InvalidProcess(format!(
            "working directory '{cwd}' must be absolute"
        )));
    }
    let oom = ctx.limits.oom_score_adj;
    if !(-1000..=1000).contains(&oom) {
        return Err(RuntimeError::InvalidProcess(format!(
            "oom score adjust {oom} is outside the range -1000 to 1000"
        )));
    }

    let sec = &cfg.security;
    let p = spec.process_mut();
    p.args.clone_from(&cfg.command);
    cwd.clone_into(&mut p.cwd);
    p.terminal = cfg.tty;
    p.env = merge_env(&p.env, &cfg.hostname, &cfg.env);
    p.user.uid = cfg.user.uid;
    p.user.gid = cfg.user.gid;
    p.user.additional_gids.clone_from(&cfg.user.group_add);
    apply_ulimits(&mut p.rlimits, &cfg.ulimits)?;
    p.no_new_privileges = sec.no_new_privileges;
    p.apparmor_profile = non_empty(&sec.apparmor_profile);
    p.selinux_label = non_empty(&sec.process_label);
    p.oom_score_adj = (oom != 0).then_some(oom);

    spec.hostname = non_empty(&cfg.hostname);
    spec.root = Some(Root {
        path: cfg.rootfs.clone(),
        readonly: sec.read_only_rootfs,
    });

    let host_net = ctx.namespaces.net.is_host();
    let host_ipc = ctx.namespaces.ipc.is_host();
    let linux = spec.linux_mut();
    for (key, value) in &cfg.sysctl {
        validate_sysctl(key, host_net, host_ipc)?;
        linux.sysctl.insert(key.clone(), value.clone());
    }
    linux.mount_label = non_empty(&sec.mount_label);
    linux.uid_mappings = parse_id_mappings(&cfg.id_mappings.uid_map)?;
    linux.gid_mappings = parse_id_mappings(&cfg.id_mappings.gid_map)?;
    Ok(spec)
}

fn resources(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    let l = ctx.limits;

    let memory = LinuxMemory {
        limit: non_zero(l.memory),
        reservation: non_zero(l.memory_reservation),
        swap: non_zero(l.memory_swap),
        kernel: non_zero(l.kernel_memory),
        swappiness: u64::try_from(l.memory_swappiness)
            .ok()
            .filter(|s| *s <= 100),
        disable_oom_killer: l.disable_oom_killer.then_some(true),
    };
    let cpu = LinuxCpu {
        shares: non_zero(l.cpu_shares),
        quota: non_zero(l.cpu_quota),
        period: non_zero(l.cpu_period),
        realtime_runtime: non_zero(l.cpu_rt_runtime),
        realtime_period: non_zero(l.cpu_rt_period),
        cpus: non_empty(&l.cpuset_cpus),
        mems: non_empty(&l.cpuset_mems),
    };

    let res = spec.resources_mut();
    if memory != LinuxMemory::default() {
        res.memory = Some(memory);
    }
    if cpu != LinuxCpu::default() {
        res.cpu = Some(cpu);
    }
    if l.pids_limit != 0 {
        res.pids = Some(LinuxPids {
            limit: l.pids_limit,
        });
    }
    Ok(spec)
}

fn cpus(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    let cpus = ctx.limits.cpus;
    if cpus > 0.0 {
        let cpu = spec.resources_mut().cpu.get_or_insert_with(LinuxCpu::default);
        cpu.period = Some(CPUS_PERIOD);
        cpu.quota = Some(cpus_quota(cpus));
    }
    Ok(spec)
}

fn namespaces(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    let has_id_mappings = !ctx.config.id_mappings.is_empty();
    let linux = spec.linux_mut();

    for (kind, mode) in ctx.namespaces.iter() {
        let typ = kind.oci_type();
        let wanted = match mode {
            NamespaceMode::Host | NamespaceMode::None => None,
            NamespaceMode::Private if kind == NamespaceKind::User && !has_id_mappings => None,
            NamespaceMode::Private => Some(None),
            NamespaceMode::Container(handle) => Some(Some(handle.namespace_path(kind))),
        };
        match wanted {
            None => linux.namespaces.retain(|ns| ns.typ != typ),
            Some(path) => match linux.namespaces.iter_mut().find(|ns| ns.typ == typ) {
                Some(existing) => existing.path = path,
                None => linux.namespaces.push(LinuxNamespace { typ, path }),
            },
        }
    }

    if ctx.namespaces.user.is_container() {
        let placeholder = LinuxIdMapping {
            container_id: 0,
            host_id: 0,
            size: 1,
        };
        if linux.uid_mappings.is_empty() {
            linux.uid_mappings.push(placeholder);
        }
        if linux.gid_mappings.is_empty() {
            linux.gid_mappings.push(placeholder);
        }
    }
    Ok(spec)
}

fn kernel_filesystems(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    if ctx.config.security.privileged {
        for mount in &mut spec.mounts {
            if mount.destination == "/sys" {
                *mount = privileged_sysfs_mount();
            }
        }
        return Ok(spec);
    }
    let linux = spec.linux_mut();
    linux.masked_paths = MASKED_PATHS.iter().map(|p| (*p).to_owned()).collect();
    linux.readonly_paths = READONLY_PATHS.iter().map(|p| (*p).to_owned()).collect();
    Ok(spec)
}

fn devices(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    let privileged = ctx.config.security.privileged;
    if privileged {
        spec.resources_mut().devices = vec![LinuxDeviceCgroup {
            allow: true,
            typ: None,
            major: None,
            minor: None,
            access: Some("rwm".to_owned()),
        }];
    }

    for raw in &ctx.config.devices {
        let request = DeviceRequest::parse(raw)?;
        let resolved = ctx.devices.device_node(
            &request.host_path,
            &request.container_path,
            &request.permissions,
        )?;
        debug!(
            "device {} -> {} ({}:{})",
            request.host_path, request.container_path, resolved.device.major, resolved.device.minor
        );
        spec.linux_mut().devices.push(resolved.device);
        if !privileged {
            spec.resources_mut().devices.push(resolved.rule);
        }
    }
    Ok(spec)
}

fn capabilities(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    let cfg = ctx.config;
    let caps = capability_set(cfg.security.privileged, &cfg.cap_add, &cfg.cap_drop)?;
    spec.process_mut().capabilities = Some(LinuxCapabilities {
        bounding: caps.clone(),
        effective: caps.clone(),
        inheritable: caps.clone(),
        permitted: caps,
        ambient: Vec::new(),
    });
    Ok(spec)
}

fn seccomp(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    let sec = &ctx.config.security;
    if sec.privileged || sec.seccomp_profile == UNCONFINED {
        spec.linux_mut().seccomp = None;
        return Ok(spec);
    }

    let profile = if sec.seccomp_profile.is_empty() {
        default_profile()
    } else {
        load_profile(Path::new(&sec.seccomp_profile))?
    };
    let granted = spec
        .process
        .as_ref()
        .and_then(|p| p.capabilities.as_ref())
        .map(|c| c.bounding.clone())
        .unwrap_or_default();
    spec.linux_mut().seccomp = Some(compile(&profile, &granted, native_arch())?);
    Ok(spec)
}

fn mounts(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    let cfg = ctx.config;

    let mut user_mounts: Vec<Mount> = Vec::new();
    for raw in &cfg.tmpfs {
        user_mounts.push(TmpfsSpec::parse(raw)?.into_mount());
    }
    let mut propagation = None;
    for raw in &cfg.volumes {
        let bind = BindMountSpec::parse(raw)?;
        if bind.propagation.is_some() {
            propagation.clone_from(&bind.propagation);
        }
        user_mounts.push(bind.into_mount(ctx.relabel, &cfg.security.mount_label)?);
    }

    let mut destinations = BTreeSet::new();
    for mount in &user_mounts {
        if !destinations.insert(mount.destination.as_str()) {
            return Err(RuntimeError::InvalidMount {
                spec: mount.destination.clone(),
                reason: "duplicate mount destination".to_owned(),
            });
        }
    }
    let dev_overridden = destinations.contains("/dev");
    spec.mounts.retain(|m| {
        let overridden = destinations.contains(m.destination.as_str())
            || (dev_overridden && m.destination.starts_with("/dev/"));
        if overridden {
            debug!("user mount replaces default {}", m.destination);
        }
        !overridden
    });
    if !destinations.contains(CGROUP_MOUNT) {
        spec.mounts.push(cgroup_mount(cfg.security.privileged));
    }
    spec.mounts.extend(user_mounts);

    if propagation.is_some() {
        spec.linux_mut().rootfs_propagation = propagation;
    }
    Ok(spec)
}

fn block_io(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    let l = ctx.limits;
    if !l.has_block_io() {
        return Ok(spec);
    }

    let throttle = |list: &[ThrottleDevice]| -> Result<Vec<LinuxThrottleDevice>, RuntimeError> {
        list.iter()
            .map(|t| -> Result<LinuxThrottleDevice, RuntimeError> {
                let (major, minor) = ctx.devices.block_device(&t.path)?;
                Ok(LinuxThrottleDevice {
                    major,
                    minor,
                    rate: t.rate,
                })
            })
            .collect()
    };

    let mut weight_device = Vec::with_capacity(l.blkio_weight_device.len());
    for wd in &l.blkio_weight_device {
        let (major, minor) = ctx.devices.block_device(&wd.path)?;
        weight_device.push(LinuxWeightDevice {
            major,
            minor,
            weight: Some(wd.weight),
        });
    }

    spec.resources_mut().block_io = Some(LinuxBlockIo {
        weight: non_zero(l.blkio_weight),
        weight_device,
        throttle_read_bps_device: throttle(&l.device_read_bps)?,
        throttle_write_bps_device: throttle(&l.device_write_bps)?,
        throttle_read_iops_device: throttle(&l.device_read_iops)?,
        throttle_write_iops_device: throttle(&l.device_write_iops)?,
    });
    Ok(spec)
}

fn annotations(ctx: &Context<'_>, mut spec: RuntimeSpec) -> Result<RuntimeSpec, RuntimeError> {
    spec.annotations = annotations::build(ctx.config.tty, &ctx.config.annotations);
    Ok(spec)
}

fn port_mappings(ctx: &Context<'_>) -> Result<Vec<PortMapping>, RuntimeError> {
    let cfg = ctx.config;
    if let Some(first) = cfg.publish.first() {
        let reason = match &ctx.namespaces.net {
            NamespaceMode::Host => Some("the network namespace is shared with the host"),
            NamespaceMode::None => Some("the container has no network"),
            NamespaceMode::Container(_) => Some("the network namespace is joined from another container"),
            NamespaceMode::Private => None,
        };
        if let Some(reason) = reason {
            return Err(RuntimeError::InvalidPort {
                spec: first.clone(),
                reason: format!("cannot publish ports: {reason}"),
            });
        }
    }

    let mut mappings = Vec::new();
    for raw in &cfg.publish {
        mappings.extend(parse_port_spec(raw)?);
    }
    for raw in &cfg.expose {
        mappings.extend(parse_expose(raw)?);
    }
    Ok(mappings)
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_owned())
}

fn non_zero<T: Default + PartialEq>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{ALL_CAPABILITIES, DEFAULT_CAPABILITIES};
    use crate::devices::ResolvedDevice;
    use crate::oci::{LinuxDevice, LinuxDeviceType, LinuxNamespaceType};
    use crate::registry::ContainerHandle;
    use kiln_schema::WeightDevice;

    struct FakeDevices;

    impl DeviceResolver for FakeDevices {
        fn device_node(
            &self,
            host_path: &str,
            container_path: &str,
            permissions: &str,
        ) -> Result<ResolvedDevice, RuntimeError> {
            if host_path != "/dev/fuse" {
                return Err(RuntimeError::DeviceResolution {
                    path: host_path.to_owned(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            Ok(ResolvedDevice {
                device: LinuxDevice {
                    path: container_path.to_owned(),
                    typ: LinuxDeviceType::Char,
                    major: 10,
                    minor: 229,
                    file_mode: Some(0o666),
                    uid: Some(0),
                    gid: Some(0),
                },
                rule: LinuxDeviceCgroup {
                    allow: true,
                    typ: Some("c".to_owned()),
                    major: Some(10),
                    minor: Some(229),
                    access: Some(permissions.to_owned()),
                },
            })
        }

        fn block_device(&self, path: &str) -> Result<(i64, i64), RuntimeError> {
            match path {
                "/dev/sda" => Ok((8, 0)),
                "/dev/sdb" => Ok((8, 16)),
                _ => Err(RuntimeError::InvalidDevice {
                    spec: path.to_owned(),
                    reason: "not a block device".to_owned(),
                }),
            }
        }
    }

    struct NoRelabel;

    impl Relabel for NoRelabel {
        fn relabel(&self, _: &Path, _: &str, _: bool) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn synth() -> Synthesizer {
        Synthesizer::new(Box::new(FakeDevices), Box::new(NoRelabel))
    }

    fn config() -> CreateConfig {
        CreateConfig {
            command: vec!["/bin/app".to_owned()],
            ..CreateConfig::default()
        }
    }

    fn run(cfg: &CreateConfig) -> Result<RuntimeSpec, RuntimeError> {
        run_with(cfg, &NamespaceModes::default())
    }

    fn run_with(cfg: &CreateConfig, modes: &NamespaceModes) -> Result<RuntimeSpec, RuntimeError> {
        synth()
            .synthesize(cfg, &cfg.resources, modes)
            .map(|s| s.spec)
    }

    fn ns_types(spec: &RuntimeSpec) -> Vec<LinuxNamespaceType> {
        spec.linux.as_ref().unwrap().namespaces.iter().map(|n| n.typ).collect()
    }

    #[test]
    fn minimal_config() {
        let spec = run(&config()).unwrap();
        let process = spec.process.as_ref().unwrap();
        assert_eq!(process.args, ["/bin/app"]);
        assert_eq!(process.cwd, "/");
        assert!(process.env.contains(&"container=kiln".to_owned()));
        assert_eq!(process.capabilities.as_ref().unwrap().bounding, DEFAULT_CAPABILITIES);

        let linux = spec.linux.as_ref().unwrap();
        assert!(linux.seccomp.is_some());
        assert!(linux.masked_paths.contains(&"/proc/kcore".to_owned()));
        assert!(linux.readonly_paths.contains(&"/proc/sys".to_owned()));
        assert!(linux.resources.as_ref().unwrap().memory.is_none());
        assert_eq!(
            ns_types(&spec),
            [
                LinuxNamespaceType::Pid,
                LinuxNamespaceType::Network,
                LinuxNamespaceType::Ipc,
                LinuxNamespaceType::Uts,
                LinuxNamespaceType::Mount,
            ]
        );

        let cgroup = spec.mounts.iter().find(|m| m.destination == CGROUP_MOUNT).unwrap();
        assert!(cgroup.options.contains(&"ro".to_owned()));
        assert_eq!(spec.annotations[annotations::TTY], "false");
    }

    #[test]
    fn process_errors() {
        let empty = CreateConfig::default();
        assert!(matches!(run(&empty), Err(RuntimeError::InvalidProcess(_))));

        let relative = CreateConfig {
            work_dir: "srv".to_owned(),
            ..config()
        };
        assert!(run(&relative).unwrap_err().to_string().contains("srv"));

        let mut oom = config();
        oom.resources.oom_score_adj = 1001;
        assert!(run(&oom).is_err());
    }

    #[test]
    fn process_fields() {
        let mut cfg = config();
        cfg.work_dir = "/srv".to_owned();
        cfg.hostname = "web".to_owned();
        cfg.tty = true;
        cfg.user.uid = 1000;
        cfg.user.group_add = vec![10, 20];
        cfg.ulimits = vec!["nofile=2048:4096".to_owned()];
        cfg.security.read_only_rootfs = true;
        cfg.security.no_new_privileges = true;
        cfg.resources.oom_score_adj = -500;
        cfg.sysctl.insert("net.ipv4.ip_forward".to_owned(), "1".to_owned());

        let spec = run(&cfg).unwrap();
        let p = spec.process.as_ref().unwrap();
        assert_eq!(p.cwd, "/srv");
        assert!(p.terminal);
        assert!(p.no_new_privileges);
        assert_eq!(p.user.additional_gids, [10, 20]);
        assert_eq!(p.oom_score_adj, Some(-500));
        assert!(p.env.contains(&"HOSTNAME=web".to_owned()));
        assert_eq!(p.rlimits.len(), 1);
        assert_eq!(p.rlimits[0].hard, 4096);
        assert_eq!(spec.hostname.as_deref(), Some("web"));
        assert!(spec.root.as_ref().unwrap().readonly);
        assert_eq!(spec.linux.as_ref().unwrap().sysctl["net.ipv4.ip_forward"], "1");
        assert_eq!(spec.annotations[annotations::TTY], "true");
    }

    #[test]
    fn net_sysctl_with_host_network() {
        let mut cfg = config();
        cfg.sysctl.insert("net.core.somaxconn".to_owned(), "1024".to_owned());
        let modes = NamespaceModes {
            net: NamespaceMode::Host,
            ..NamespaceModes::default()
        };
        let err = run_with(&cfg, &modes).unwrap_err();
        assert!(err.to_string().contains("net.core.somaxconn"));
    }

    #[test]
    fn resources_and_cpus() {
        let mut cfg = config();
        cfg.resources.memory = 64 << 20;
        cfg.resources.memory_swappiness = 10;
        cfg.resources.pids_limit = 100;
        cfg.resources.cpus = 1.5;
        cfg.resources.cpuset_cpus = "0-1".to_owned();

        let spec = run(&cfg).unwrap();
        let res = spec.linux.as_ref().unwrap().resources.as_ref().unwrap();
        let memory = res.memory.as_ref().unwrap();
        assert_eq!(memory.limit, Some(64 << 20));
        assert_eq!(memory.swappiness, Some(10));
        assert!(memory.swap.is_none());
        let cpu = res.cpu.as_ref().unwrap();
        assert_eq!(cpu.period, Some(100_000));
        assert_eq!(cpu.quota, Some(150_000));
        assert_eq!(cpu.cpus.as_deref(), Some("0-1"));
        assert_eq!(res.pids.unwrap().limit, 100);
    }

    #[test]
    fn namespace_modes() {
        let mut cfg = config();
        let peer = ContainerHandle::new("c0ffee", "db", 77);
        let modes = NamespaceModes {
            pid: NamespaceMode::Host,
            net: NamespaceMode::None,
            ipc: NamespaceMode::Container(peer.clone()),
            uts: NamespaceMode::Private,
            user: NamespaceMode::Container(peer),
        };
        let spec = run_with(&cfg, &modes).unwrap();
        let linux = spec.linux.as_ref().unwrap();
        assert_eq!(
            ns_types(&spec),
            [
                LinuxNamespaceType::Ipc,
                LinuxNamespaceType::Uts,
                LinuxNamespaceType::Mount,
                LinuxNamespaceType::User,
            ]
        );
        assert_eq!(linux.namespaces[0].path.as_deref(), Some("/proc/77/ns/ipc"));
        assert_eq!(linux.namespaces[3].path.as_deref(), Some("/proc/77/ns/user"));
        assert_eq!(linux.uid_mappings[0].size, 1);
        assert_eq!(linux.gid_mappings.len(), 1);

        cfg.id_mappings.uid_map = vec!["0:100000:65536".to_owned()];
        cfg.id_mappings.gid_map = vec!["0:100000:65536".to_owned()];
        let spec = run(&cfg).unwrap();
        assert!(ns_types(&spec).contains(&LinuxNamespaceType::User));
        assert_eq!(spec.linux.as_ref().unwrap().uid_mappings[0].host_id, 100_000);

        let spec = run(&config()).unwrap();
        assert!(!ns_types(&spec).contains(&LinuxNamespaceType::User));
    }

    #[test]
    fn privileged_container() {
        let mut cfg = config();
        cfg.security.privileged = true;
        cfg.devices = vec!["/dev/fuse".to_owned()];
        let spec = run(&cfg).unwrap();

        let linux = spec.linux.as_ref().unwrap();
        assert!(linux.seccomp.is_none());
        assert!(linux.masked_paths.is_empty());
        assert_eq!(linux.devices.len(), 1);
        let rules = &linux.resources.as_ref().unwrap().devices;
        assert_eq!(rules.len(), 1);
        assert!(rules[0].allow);

        let caps = &spec.process.as_ref().unwrap().capabilities.as_ref().unwrap().permitted;
        assert_eq!(caps.len(), ALL_CAPABILITIES.len());

        let sys = spec.mounts.iter().find(|m| m.destination == "/sys").unwrap();
        assert!(sys.options.contains(&"rw".to_owned()));
        let cgroup = spec.mounts.iter().find(|m| m.destination == CGROUP_MOUNT).unwrap();
        assert!(cgroup.options.contains(&"rw".to_owned()));
    }

    #[test]
    fn devices_append_allow_rules() {
        let mut cfg = config();
        cfg.devices = vec!["/dev/fuse:/dev/fuse0:rw".to_owned()];
        let spec = run(&cfg).unwrap();
        let linux = spec.linux.as_ref().unwrap();
        assert_eq!(linux.devices[0].path, "/dev/fuse0");
        let rules = &linux.resources.as_ref().unwrap().devices;
        assert!(!rules[0].allow);
        assert_eq!(rules[1].access.as_deref(), Some("rw"));

        cfg.devices = vec!["/dev/missing".to_owned()];
        assert!(matches!(run(&cfg), Err(RuntimeError::DeviceResolution { .. })));
        cfg.devices = vec!["/dev/fuse:/dev/fuse:rwx".to_owned()];
        assert!(matches!(run(&cfg), Err(RuntimeError::InvalidDevice { .. })));
    }

    #[test]
    fn mounts_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.tmpfs = vec!["/dev/shm:rw,size=1g".to_owned()];
        cfg.volumes = vec![
            format!("{}:/data:ro", dir.path().display()),
            format!("{}:/cache:rslave", dir.path().display()),
        ];
        let spec = run(&cfg).unwrap();

        let shm: Vec<&Mount> = spec.mounts.iter().filter(|m| m.destination == "/dev/shm").collect();
        assert_eq!(shm.len(), 1);
        assert_eq!(shm[0].options, ["rw", "size=1g", "tmpcopyup"]);
        assert!(spec.mounts.iter().any(|m| m.destination == "/data"));
        assert_eq!(
            spec.linux.as_ref().unwrap().rootfs_propagation.as_deref(),
            Some("rslave")
        );

        cfg.volumes.clear();
        cfg.tmpfs = vec!["/dev".to_owned()];
        let spec = run(&cfg).unwrap();
        assert!(!spec.mounts.iter().any(|m| m.destination.starts_with("/dev/")));

        cfg.tmpfs = vec!["/run".to_owned(), "/run:size=1m".to_owned()];
        assert!(matches!(run(&cfg), Err(RuntimeError::InvalidMount { .. })));
    }

    #[test]
    fn block_io_resolves_devices() {
        let mut cfg = config();
        cfg.resources.blkio_weight = 300;
        cfg.resources.blkio_weight_device = vec![WeightDevice {
            path: "/dev/sdb".to_owned(),
            weight: 200,
        }];
        cfg.resources.device_read_bps = vec![ThrottleDevice {
            path: "/dev/sda".to_owned(),
            rate: 1 << 20,
        }];
        let spec = run(&cfg).unwrap();
        let bio = spec.linux.as_ref().unwrap().resources.as_ref().unwrap().block_io.as_ref().unwrap();
        assert_eq!(bio.weight, Some(300));
        assert_eq!((bio.weight_device[0].major, bio.weight_device[0].minor), (8, 16));
        assert_eq!(bio.throttle_read_bps_device[0].rate, 1 << 20);
        assert!(bio.throttle_write_iops_device.is_empty());

        cfg.resources.device_write_iops = vec![ThrottleDevice {
            path: "/dev/null".to_owned(),
            rate: 10,
        }];
        assert!(run(&cfg).unwrap_err().to_string().contains("/dev/null"));

        let spec = run(&config()).unwrap();
        assert!(spec.linux.unwrap().resources.unwrap().block_io.is_none());
    }

    #[test]
    fn seccomp_choices() {
        let mut cfg = config();
        let spec = run(&cfg).unwrap();
        let json = serde_json::to_value(spec.linux.unwrap().seccomp.unwrap()).unwrap();
        let rules = json["syscalls"].as_array().unwrap();
        assert!(rules
            .iter()
            .any(|r| r["names"][0] == "clone3" && r["errnoRet"] == 38));
        assert!(rules.iter().any(|r| r["names"][0] == "personality"));

        cfg.security.seccomp_profile = UNCONFINED.to_owned();
        assert!(run(&cfg).unwrap().linux.unwrap().seccomp.is_none());

        cfg.security.seccomp_profile = "/kiln/missing/profile.json".to_owned();
        let err = run(&cfg).unwrap_err().to_string();
        assert!(err.starts_with("opening seccomp profile (/kiln/missing/profile.json) failed"));
    }

    #[test]
    fn ports_follow_network_mode() {
        let mut cfg = config();
        cfg.publish = vec!["8080:80/tcp".to_owned()];
        cfg.expose = vec!["9090/udp".to_owned()];
        let synthesis = synth()
            .synthesize(&cfg, &cfg.resources, &NamespaceModes::default())
            .unwrap();
        assert_eq!(synthesis.port_mappings.len(), 2);
        assert_eq!(synthesis.port_mappings[0].host_port, 8080);

        let modes = NamespaceModes {
            net: NamespaceMode::Container(ContainerHandle::new("c0ffee", "db", 77)),
            ..NamespaceModes::default()
        };
        let err = run_with(&cfg, &modes).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidPort { .. }));
        assert!(err.to_string().contains("8080:80/tcp"));
    }

    #[test]
    fn capability_tweaks_reach_every_set() {
        let mut cfg = config();
        cfg.cap_add = vec!["NET_ADMIN".to_owned()];
        cfg.cap_drop = vec!["ALL".to_owned()];
        let spec = run(&cfg).unwrap();
        let caps = spec.process.unwrap().capabilities.unwrap();
        assert_eq!(caps.bounding, ["CAP_NET_ADMIN"]);
        assert_eq!(caps.effective, caps.permitted);
        assert_eq!(caps.inheritable, caps.bounding);

        cfg.cap_add = vec!["CAP_WIZARDRY".to_owned()];
        assert!(matches!(run(&cfg), Err(RuntimeError::UnknownCapability(_))));
    }
}
