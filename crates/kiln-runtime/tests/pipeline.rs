//! End-to-end tests for config → validate → resolve → synthesize.
//!
//! Everything here runs against synthetic host capability snapshots and an
//! in-memory registry, so the results do not depend on the machine the tests
//! run on.

use kiln_runtime::oci::LinuxNamespaceType;
use kiln_runtime::{
    generate, ContainerHandle, HostCapabilities, RuntimeError, StaticRegistry, Synthesizer,
};
use kiln_schema::{parse_config_str, CreateConfig};

const MIB: i64 = 1024 * 1024;

fn full_host() -> HostCapabilities {
    HostCapabilities::all_supported("0-3".parse().unwrap(), "0".parse().unwrap())
}

fn no_swap_host() -> HostCapabilities {
    HostCapabilities {
        swap_limit: false,
        ..full_host()
    }
}

fn registry() -> StaticRegistry {
    StaticRegistry::from_handles([
        ContainerHandle::new("4e5f6a7b8c9d", "web", 4242),
        ContainerHandle::new("0a1b2c3d4e5f", "stopped", 0),
    ])
}

fn limited_config() -> CreateConfig {
    parse_config_str(
        r#"
command = ["/usr/bin/server", "--port", "80"]

[resources]
memory = "8m"
cpu_period = 100000
cpu_quota = 50000
"#,
    )
    .unwrap()
}

#[test]
fn full_support_host_produces_exact_limits_without_warnings() {
    let out = generate(&limited_config(), &full_host(), &registry(), false).unwrap();
    assert!(out.warnings.is_empty(), "unexpected warnings: {:?}", out.warnings);

    let res = out.spec.linux.as_ref().unwrap().resources.as_ref().unwrap();
    let memory = res.memory.as_ref().unwrap();
    assert_eq!(memory.limit, Some(8 * MIB));
    assert_eq!(memory.limit, Some(8_388_608));

    let cpu = res.cpu.as_ref().unwrap();
    let ratio = cpu.quota.unwrap() as f64 / cpu.period.unwrap() as f64;
    assert!((ratio - 0.5).abs() < f64::EPSILON);
}

#[test]
fn host_without_swap_limit_clears_swap_with_one_warning() {
    let out = generate(&limited_config(), &no_swap_host(), &registry(), false).unwrap();

    let memory = out.spec.linux.as_ref().unwrap().resources.as_ref().unwrap().memory.clone().unwrap();
    assert_eq!(memory.limit, Some(8_388_608));
    assert_eq!(memory.swap, Some(-1));
    assert_eq!(out.warnings.len(), 1);
    assert!(out.warnings[0].contains("swap"), "{}", out.warnings[0]);
}

#[test]
fn generation_is_idempotent() {
    let cfg = limited_config();
    let caps = full_host();
    let reg = registry();

    let first = generate(&cfg, &caps, &reg, false).unwrap();
    let second = generate(&cfg, &caps, &reg, false).unwrap();
    assert_eq!(first.spec.digest().unwrap(), second.spec.digest().unwrap());
    assert_eq!(
        first.spec.to_json_pretty().unwrap(),
        second.spec.to_json_pretty().unwrap()
    );
    assert_eq!(first, second);
}

#[test]
fn concurrent_synthesis_shares_one_snapshot() {
    let caps = full_host();
    let reg = registry();
    let synthesizer = Synthesizer::host();

    let configs: Vec<CreateConfig> = (0..4)
        .map(|i| CreateConfig {
            hostname: format!("worker-{i}"),
            ..limited_config()
        })
        .collect();
    let serial: Vec<String> = configs
        .iter()
        .map(|cfg| {
            synthesizer
                .generate(cfg, &caps, &reg, false)
                .unwrap()
                .spec
                .digest()
                .unwrap()
        })
        .collect();

    let parallel: Vec<String> = std::thread::scope(|s| {
        let handles: Vec<_> = configs
            .iter()
            .map(|cfg| {
                let (caps, reg, synthesizer) = (&caps, &reg, &synthesizer);
                s.spawn(move || {
                    synthesizer
                        .generate(cfg, caps, reg, false)
                        .unwrap()
                        .spec
                        .digest()
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(serial, parallel);
    let distinct: std::collections::BTreeSet<&String> = parallel.iter().collect();
    assert_eq!(distinct.len(), 4);
}

#[test]
fn joined_namespace_references_the_peer() {
    let mut cfg = limited_config();
    cfg.namespaces.net = "container:web".to_owned();
    cfg.namespaces.ipc = "container:4e5f".to_owned();

    let out = generate(&cfg, &full_host(), &registry(), false).unwrap();
    let namespaces = &out.spec.linux.as_ref().unwrap().namespaces;
    let path_of = |typ| {
        namespaces
            .iter()
            .find(|ns| ns.typ == typ)
            .and_then(|ns| ns.path.clone())
    };
    assert_eq!(path_of(LinuxNamespaceType::Network).as_deref(), Some("/proc/4242/ns/net"));
    assert_eq!(path_of(LinuxNamespaceType::Ipc).as_deref(), Some("/proc/4242/ns/ipc"));
    assert_eq!(path_of(LinuxNamespaceType::Pid), None);
}

#[test]
fn unresolvable_peer_is_fatal() {
    for (reference, expect_running_error) in [("container:ghost", false), ("container:stopped", true)] {
        let mut cfg = limited_config();
        cfg.namespaces.pid = reference.to_owned();
        let err = generate(&cfg, &full_host(), &registry(), false).unwrap_err();
        if expect_running_error {
            assert!(matches!(err, RuntimeError::ContainerNotRunning(_)), "{err}");
        } else {
            assert!(matches!(err, RuntimeError::ContainerNotFound { .. }), "{err}");
        }
    }
}

#[test]
fn cpu_period_bounds() {
    for (period, ok) in [(999, false), (1000, true), (1_000_000, true), (1_000_001, false)] {
        let mut cfg = limited_config();
        cfg.resources.cpu_period = period;
        let result = generate(&cfg, &full_host(), &registry(), false);
        assert_eq!(result.is_ok(), ok, "period {period}: {result:?}");
    }
}

#[test]
fn memory_floor_and_swap_ordering() {
    let mut cfg = limited_config();
    cfg.resources.memory = 4 * MIB - 1;
    assert!(matches!(
        generate(&cfg, &full_host(), &registry(), false),
        Err(RuntimeError::InvalidResource(_))
    ));

    cfg.resources.memory = 16 * MIB;
    cfg.resources.memory_swap = 8 * MIB;
    assert!(generate(&cfg, &full_host(), &registry(), false).is_err());

    cfg.resources.memory_swap = 32 * MIB;
    let out = generate(&cfg, &full_host(), &registry(), false).unwrap();
    let memory = out.spec.linux.unwrap().resources.unwrap().memory.unwrap();
    assert_eq!(memory.swap, Some(32 * MIB));
}

#[test]
fn swap_without_memory_is_allowed_only_for_updates() {
    let mut cfg = limited_config();
    cfg.resources.memory = 0;
    cfg.resources.memory_swap = 64 * MIB;
    assert!(generate(&cfg, &full_host(), &registry(), false).is_err());
    assert!(generate(&cfg, &full_host(), &registry(), true).is_ok());
}

#[test]
fn config_file_drives_every_section() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir(&data).unwrap();

    let cfg = parse_config_str(&format!(
        r#"
command = ["/bin/sh"]
hostname = "box"
volumes = ["{}:/data:ro,rshared"]
tmpfs = ["/run:rw,size=16m"]
ulimits = ["nofile=4096"]
publish = ["127.0.0.1:8080:80/tcp"]
cap_drop = ["NET_RAW"]

[env]
LANG = "C.UTF-8"

[sysctl]
"kernel.shmmax" = "68719476736"

[annotations]
"org.example.owner" = "platform"
"#,
        data.display()
    ))
    .unwrap();

    let out = generate(&cfg, &full_host(), &registry(), false).unwrap();
    let spec = &out.spec;
    let process = spec.process.as_ref().unwrap();
    assert!(process.env.contains(&"LANG=C.UTF-8".to_owned()));
    assert!(process.env.contains(&"HOSTNAME=box".to_owned()));
    assert!(!process
        .capabilities
        .as_ref()
        .unwrap()
        .bounding
        .contains(&"CAP_NET_RAW".to_owned()));

    let data_mount = spec.mounts.iter().find(|m| m.destination == "/data").unwrap();
    assert!(data_mount.options.contains(&"ro".to_owned()));
    assert!(data_mount.options.contains(&"rbind".to_owned()));
    let linux = spec.linux.as_ref().unwrap();
    assert_eq!(linux.rootfs_propagation.as_deref(), Some("rshared"));
    assert_eq!(linux.sysctl["kernel.shmmax"], "68719476736");
    assert_eq!(spec.annotations["org.example.owner"], "platform");

    assert_eq!(out.port_mappings.len(), 1);
    assert_eq!(out.port_mappings[0].host_ip, "127.0.0.1");

    let json: serde_json::Value = serde_json::from_str(&spec.to_json_pretty().unwrap()).unwrap();
    assert_eq!(json["ociVersion"], "1.0.2");
    assert_eq!(json["process"]["rlimits"][0]["type"], "RLIMIT_NOFILE");
}

#[test]
fn bad_literals_abort_without_a_spec() {
    let cases: &[(&str, &str)] = &[
        ("devices = [\"/dev/null:/dev/null:rwx\"]", "rwx"),
        ("volumes = [\"/tmp:/data:bogus\"]", "bogus"),
        ("ulimits = [\"files=10\"]", "files=10"),
        ("publish = [\"80-82:90-91\"]", "80-82:90-91"),
        ("[sysctl]\n\"vm.overcommit_memory\" = \"1\"", "vm.overcommit_memory"),
    ];
    for (fragment, literal) in cases {
        let cfg = parse_config_str(&format!("command = [\"/bin/true\"]\n{fragment}\n")).unwrap();
        let err = generate(&cfg, &full_host(), &registry(), false).unwrap_err();
        assert!(err.to_string().contains(literal), "{fragment}: {err}");
    }
}
