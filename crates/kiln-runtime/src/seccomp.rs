//! Seccomp profile loading and compilation.
//!
//! Profiles use the docker JSON format: a default action, an architecture
//! list or arch map, and syscall rules that may be gated on granted
//! capabilities or the native architecture. Plain OCI seccomp documents are
//! a subset of that format and load the same way. Compilation resolves the
//! gates and produces the runtime-spec `LinuxSeccomp`.

use crate::oci::{LinuxSeccomp, LinuxSeccompArg, LinuxSyscall};
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const UNCONFINED: &str = "unconfined";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub default_action: String,
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub arch_map: Vec<ArchMap>,
    #[serde(default)]
    pub syscalls: Vec<SyscallRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchMap {
    pub architecture: String,
    #[serde(default)]
    pub sub_architectures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallRule {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub name: String,
    pub action: String,
    #[serde(rename = "errnoRet", default)]
    pub errno_ret: Option<u32>,
    #[serde(default)]
    pub args: Vec<RuleArg>,
    #[serde(default)]
    pub includes: Filter,
    #[serde(default)]
    pub excludes: Filter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleArg {
    pub index: u32,
    pub value: u64,
    #[serde(default)]
    pub value_two: u64,
    pub op: String,
}

/// Capability and architecture gates on a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(default)]
    pub arches: Vec<String>,
}

impl SyscallRule {
    fn allow(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| (*n).to_owned()).collect(),
            name: String::new(),
            action: "SCMP_ACT_ALLOW".to_owned(),
            errno_ret: None,
            args: Vec::new(),
            includes: Filter::default(),
            excludes: Filter::default(),
        }
    }

    fn applies(&self, caps: &[String], arch: &str) -> bool {
        let arch_listed = |arches: &[String]| arches.iter().any(|a| a == arch);
        let has_cap = |cap: &String| caps.contains(cap);

        if !self.includes.arches.is_empty() && !arch_listed(&self.includes.arches) {
            return false;
        }
        if !self.includes.caps.iter().all(has_cap) {
            return false;
        }
        if arch_listed(&self.excludes.arches) {
            return false;
        }
        !self.excludes.caps.iter().any(has_cap)
    }
}

/// The seccomp architecture name for the host this binary runs on.
pub fn native_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "SCMP_ARCH_X86",
        "aarch64" => "SCMP_ARCH_AARCH64",
        "arm" => "SCMP_ARCH_ARM",
        "powerpc64" => "SCMP_ARCH_PPC64LE",
        "s390x" => "SCMP_ARCH_S390X",
        "riscv64" => "SCMP_ARCH_RISCV64",
        "mips64" => "SCMP_ARCH_MIPS64",
        _ => "SCMP_ARCH_X86_64",
    }
}

/// Read and decode a profile file.
pub fn load_profile(path: &Path) -> Result<Profile, RuntimeError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RuntimeError::Seccomp(format!(
            "opening seccomp profile ({}) failed: {e}",
            path.display()
        ))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        RuntimeError::Seccomp(format!(
            "decoding seccomp profile ({}) failed: {e}",
            path.display()
        ))
    })
}

/// Resolve `profile` for a process holding `caps` on architecture `arch`.
pub fn compile(profile: &Profile, caps: &[String], arch: &str) -> Result<LinuxSeccomp, RuntimeError> {
    let architectures = if profile.arch_map.is_empty() {
        profile.architectures.clone()
    } else {
        profile
            .arch_map
            .iter()
            .filter(|m| m.architecture == arch)
            .flat_map(|m| std::iter::once(m.architecture.clone()).chain(m.sub_architectures.iter().cloned()))
            .collect()
    };

    let mut syscalls = Vec::new();
    for rule in &profile.syscalls {
        let names = match (rule.name.is_empty(), rule.names.is_empty()) {
            (true, false) => rule.names.clone(),
            (false, true) => vec![rule.name.clone()],
            (false, false) => {
                return Err(RuntimeError::Seccomp(format!(
                    "syscall rule for '{}' sets both 'name' and 'names'",
                    rule.name
                )))
            }
            (true, true) => {
                return Err(RuntimeError::Seccomp(
                    "syscall rule without 'name' or 'names'".to_owned(),
                ))
            }
        };
        if !rule.applies(caps, arch) {
            continue;
        }
        syscalls.push(LinuxSyscall {
            names,
            action: rule.action.clone(),
            errno_ret: rule.errno_ret,
            args: rule
                .args
                .iter()
                .map(|a| LinuxSeccompArg {
                    index: a.index,
                    value: a.value,
                    value_two: a.value_two,
                    op: a.op.clone(),
                })
                .collect(),
        });
    }
    debug!(
        "compiled seccomp profile: {} rules for {arch}, default {}",
        syscalls.len(),
        profile.default_action
    );

    Ok(LinuxSeccomp {
        default_action: profile.default_action.clone(),
        architectures,
        syscalls,
    })
}

const ALLOWED: &[&str] = &[
    "accept", "accept4", "access", "adjtimex", "alarm", "bind", "brk", "capget", "capset",
    "chdir", "chmod", "chown", "chown32", "clock_adjtime", "clock_getres", "clock_gettime",
    "clock_nanosleep", "close", "close_range", "connect", "copy_file_range", "creat", "dup",
    "dup2", "dup3", "epoll_create", "epoll_create1", "epoll_ctl", "epoll_pwait", "epoll_pwait2",
    "epoll_wait", "eventfd", "eventfd2", "execve", "execveat", "exit", "exit_group",
    "faccessat", "faccessat2", "fadvise64", "fallocate", "fanotify_mark", "fchdir", "fchmod",
    "fchmodat", "fchown", "fchownat", "fcntl", "fdatasync", "fgetxattr", "flistxattr", "flock",
    "fork", "fremovexattr", "fsetxattr", "fstat", "fstatfs", "fsync", "ftruncate", "futex",
    "futimesat", "getcpu", "getcwd", "getdents", "getdents64", "getegid", "geteuid", "getgid",
    "getgroups", "getitimer", "getpeername", "getpgid", "getpgrp", "getpid", "getppid",
    "getpriority", "getrandom", "getresgid", "getresuid", "getrlimit", "get_robust_list",
    "getrusage", "getsid", "getsockname", "getsockopt", "get_thread_area", "gettid",
    "gettimeofday", "getuid", "getxattr", "inotify_add_watch", "inotify_init", "inotify_init1",
    "inotify_rm_watch", "io_cancel", "ioctl", "io_destroy", "io_getevents", "io_pgetevents",
    "ioprio_get", "ioprio_set", "io_setup", "io_submit", "ipc", "kill", "lchown", "lgetxattr",
    "link", "linkat", "listen", "listxattr", "llistxattr", "lremovexattr", "lseek", "lsetxattr",
    "lstat", "madvise", "membarrier", "memfd_create", "mincore", "mkdir", "mkdirat", "mknod",
    "mknodat", "mlock", "mlock2", "mlockall", "mmap", "mprotect", "mq_getsetattr", "mq_notify",
    "mq_open", "mq_timedreceive", "mq_timedsend", "mq_unlink", "mremap", "msgctl", "msgget",
    "msgrcv", "msgsnd", "msync", "munlock", "munlockall", "munmap", "nanosleep", "newfstatat",
    "open", "openat", "openat2", "pause", "pidfd_open", "pidfd_send_signal", "pipe", "pipe2",
    "poll", "ppoll", "prctl", "pread64", "preadv", "preadv2", "prlimit64", "pselect6",
    "pwrite64", "pwritev", "pwritev2", "read", "readahead", "readlink", "readlinkat", "readv",
    "recv", "recvfrom", "recvmmsg", "recvmsg", "remap_file_pages", "removexattr", "rename",
    "renameat", "renameat2", "restart_syscall", "rmdir", "rseq", "rt_sigaction",
    "rt_sigpending", "rt_sigprocmask", "rt_sigqueueinfo", "rt_sigreturn", "rt_sigsuspend",
    "rt_sigtimedwait", "rt_tgsigqueueinfo", "sched_getaffinity", "sched_getattr",
    "sched_getparam", "sched_get_priority_max", "sched_get_priority_min", "sched_getscheduler",
    "sched_rr_get_interval", "sched_setaffinity", "sched_setattr", "sched_setparam",
    "sched_setscheduler", "sched_yield", "seccomp", "select", "semctl", "semget", "semop",
    "semtimedop", "send", "sendfile", "sendmmsg", "sendmsg", "sendto", "setfsgid", "setfsuid",
    "setgid", "setgroups", "setitimer", "setpgid", "setpriority", "setregid", "setresgid",
    "setresuid", "setreuid", "setrlimit", "set_robust_list", "setsid", "setsockopt",
    "set_thread_area", "set_tid_address", "setuid", "setxattr", "shmat", "shmctl", "shmdt",
    "shmget", "shutdown", "sigaltstack", "signalfd", "signalfd4", "socket", "socketcall",
    "socketpair", "splice", "stat", "statfs", "statx", "symlink", "symlinkat", "sync",
    "sync_file_range", "syncfs", "sysinfo", "tee", "tgkill", "time", "timer_create",
    "timer_delete", "timer_getoverrun", "timer_gettime", "timer_settime", "timerfd_create",
    "timerfd_gettime", "timerfd_settime", "times", "tkill", "truncate", "umask", "uname",
    "unlink", "unlinkat", "utime", "utimensat", "utimes", "vfork", "vmsplice", "wait4",
    "waitid", "write", "writev",
];

/// 32-bit variants, reachable through the x86 and arm sub-architectures.
const ALLOWED_32BIT: &[&str] = &[
    "_llseek", "_newselect", "clock_adjtime64", "clock_getres_time64", "clock_gettime64",
    "clock_nanosleep_time64", "fadvise64_64", "fchown32", "fcntl64", "fstat64", "fstatat64",
    "fstatfs64", "ftruncate64", "futex_time64", "getegid32", "geteuid32", "getgid32",
    "getgroups32", "getresgid32", "getresuid32", "getuid32", "io_pgetevents_time64",
    "lchown32", "lstat64", "mmap2", "mq_timedreceive_time64", "mq_timedsend_time64",
    "ppoll_time64", "pselect6_time64", "recvmmsg_time64", "rt_sigtimedwait_time64",
    "sched_rr_get_interval_time64", "semtimedop_time64", "sendfile64", "setfsgid32",
    "setfsuid32", "setgid32", "setgroups32", "setregid32", "setresgid32", "setresuid32",
    "setreuid32", "setuid32", "sigaction", "signal", "sigpending",
    "sigprocmask", "sigreturn", "sigsuspend", "stat64", "statfs64", "timer_gettime64",
    "timer_settime64", "timerfd_gettime64", "timerfd_settime64", "truncate64", "ugetrlimit",
    "utimensat_time64", "waitpid",
];

/// Per-architecture syscalls, keyed by the arches the rule applies to.
const ARCH_SPECIFIC: &[(&[&str], &[&str])] = &[
    (
        &["SCMP_ARCH_X86_64", "SCMP_ARCH_X32", "SCMP_ARCH_X86"],
        &["arch_prctl", "modify_ldt"],
    ),
    (
        &["SCMP_ARCH_ARM", "SCMP_ARCH_AARCH64"],
        &["arm_fadvise64_64", "arm_sync_file_range", "breakpoint", "cacheflush", "set_tls"],
    ),
    (&["SCMP_ARCH_S390", "SCMP_ARCH_S390X"], &["s390_pci_mmio_read", "s390_pci_mmio_write", "s390_runtime_instr"]),
];

/// Execution domains a process may switch to: linux, linux32, and the
/// query value `0xffffffff`.
const PERSONALITIES: &[u64] = &[0x0, 0x8, 0x20000, 0x20008, 0xffff_ffff];

/// Returned for `clone3` so libc falls back to `clone`.
const ENOSYS: u32 = 38;

/// Syscalls allowed only when the named capability is granted.
const CAPABILITY_GATED: &[(&str, &[&str])] = &[
    (
        "CAP_SYS_ADMIN",
        &[
            "bpf", "clone", "clone3", "fanotify_init", "fsconfig", "fsmount", "fsopen", "fspick",
            "lookup_dcookie", "mount", "move_mount", "name_to_handle_at", "open_tree",
            "perf_event_open", "quotactl", "setdomainname", "sethostname", "setns", "syslog",
            "umount", "umount2", "unshare",
        ],
    ),
    ("CAP_SYS_BOOT", &["reboot"]),
    ("CAP_SYS_CHROOT", &["chroot"]),
    (
        "CAP_SYS_MODULE",
        &["delete_module", "init_module", "finit_module"],
    ),
    ("CAP_SYS_PACCT", &["acct"]),
    (
        "CAP_SYS_PTRACE",
        &["kcmp", "pidfd_getfd", "process_madvise", "process_vm_readv", "process_vm_writev", "ptrace"],
    ),
    ("CAP_SYS_RAWIO", &["iopl", "ioperm"]),
    ("CAP_SYS_TIME", &["settimeofday", "stime", "clock_settime"]),
    ("CAP_SYS_NICE", &["get_mempolicy", "mbind", "set_mempolicy"]),
    ("CAP_SYSLOG", &["syslog"]),
];

/// Namespace-creating clone flags, refused without `CAP_SYS_ADMIN`.
const CLONE_NAMESPACE_FLAGS: u64 = 0x7E02_0000;

/// The built-in profile: deny by default, allow the common syscall surface,
/// and open further syscalls as the matching capabilities are granted.
pub fn default_profile() -> Profile {
    let mut syscalls = vec![SyscallRule::allow(ALLOWED), SyscallRule::allow(ALLOWED_32BIT)];

    for value in PERSONALITIES {
        syscalls.push(SyscallRule {
            args: vec![RuleArg {
                index: 0,
                value: *value,
                value_two: 0,
                op: "SCMP_CMP_EQ".to_owned(),
            }],
            ..SyscallRule::allow(&["personality"])
        });
    }

    for (arches, names) in ARCH_SPECIFIC {
        syscalls.push(SyscallRule {
            includes: Filter {
                caps: Vec::new(),
                arches: arches.iter().map(|a| (*a).to_owned()).collect(),
            },
            ..SyscallRule::allow(names)
        });
    }

    syscalls.push(SyscallRule {
        args: vec![RuleArg {
            index: 0,
            value: CLONE_NAMESPACE_FLAGS,
            value_two: 0,
            op: "SCMP_CMP_MASKED_EQ".to_owned(),
        }],
        excludes: Filter {
            caps: vec!["CAP_SYS_ADMIN".to_owned()],
            arches: vec!["SCMP_ARCH_S390X".to_owned()],
        },
        ..SyscallRule::allow(&["clone"])
    });
    syscalls.push(SyscallRule {
        action: "SCMP_ACT_ERRNO".to_owned(),
        errno_ret: Some(ENOSYS),
        excludes: Filter {
            caps: vec!["CAP_SYS_ADMIN".to_owned()],
            arches: Vec::new(),
        },
        ..SyscallRule::allow(&["clone3"])
    });

    for (cap, names) in CAPABILITY_GATED {
        syscalls.push(SyscallRule {
            includes: Filter {
                caps: vec![(*cap).to_owned()],
                arches: Vec::new(),
            },
            ..SyscallRule::allow(names)
        });
    }

    let arch = |name: &str, subs: &[&str]| ArchMap {
        architecture: name.to_owned(),
        sub_architectures: subs.iter().map(|s| (*s).to_owned()).collect(),
    };

    Profile {
        default_action: "SCMP_ACT_ERRNO".to_owned(),
        architectures: Vec::new(),
        arch_map: vec![
            arch("SCMP_ARCH_X86_64", &["SCMP_ARCH_X86", "SCMP_ARCH_X32"]),
            arch("SCMP_ARCH_AARCH64", &["SCMP_ARCH_ARM"]),
            arch("SCMP_ARCH_PPC64LE", &[]),
            arch("SCMP_ARCH_S390X", &["SCMP_ARCH_S390"]),
            arch("SCMP_ARCH_RISCV64", &[]),
        ],
        syscalls,
    }
}
