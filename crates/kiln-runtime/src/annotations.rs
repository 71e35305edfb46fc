use std::collections::BTreeMap;

pub const TTY: &str = "io.kubernetes.cri-o.TTY";

/// Keys every container carries so downstream tooling sees a stable shape.
pub const DEFAULT_KEYS: &[&str] = &[
    "io.kubernetes.cri-o.Annotations",
    "io.kubernetes.cri-o.ContainerID",
    "io.kubernetes.cri-o.ContainerName",
    "io.kubernetes.cri-o.ContainerType",
    "io.kubernetes.cri-o.Created",
    "io.kubernetes.cri-o.HostName",
    "io.kubernetes.cri-o.IP",
    "io.kubernetes.cri-o.Image",
    "io.kubernetes.cri-o.ImageName",
    "io.kubernetes.cri-o.ImageRef",
    "io.kubernetes.cri-o.KubeName",
    "io.kubernetes.cri-o.Labels",
    "io.kubernetes.cri-o.LogPath",
    "io.kubernetes.cri-o.Metadata",
    "io.kubernetes.pod.name",
    "io.kubernetes.cri-o.PrivilegedRuntime",
    "io.kubernetes.cri-o.ResolvPath",
    "io.kubernetes.cri-o.HostnamePath",
    "io.kubernetes.cri-o.SandboxID",
    "io.kubernetes.cri-o.SandboxName",
    "io.kubernetes.cri-o.ShmPath",
    "io.kubernetes.cri-o.MountPoint",
    "io.kubernetes.cri-o.TrustedSandbox",
    TTY,
    "io.kubernetes.cri-o.Stdin",
    "io.kubernetes.cri-o.StdinOnce",
    "io.kubernetes.cri-o.Volumes",
];

/// Default annotations with `user` entries layered on top.
pub fn build(tty: bool, user: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut annotations: BTreeMap<String, String> = DEFAULT_KEYS
        .iter()
        .map(|k| ((*k).to_owned(), String::new()))
        .collect();
    annotations.insert(TTY.to_owned(), tty.to_string());
    annotations.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
    annotations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_empty_except_tty() {
        let annotations = build(false, &BTreeMap::new());
        assert_eq!(annotations.len(), DEFAULT_KEYS.len());
        assert_eq!(annotations[TTY], "false");
        assert!(annotations
            .iter()
            .filter(|(k, _)| k.as_str() != TTY)
            .all(|(_, v)| v.is_empty()));
        assert_eq!(build(true, &BTreeMap::new())[TTY], "true");
    }

    #[test]
    fn user_entries_win() {
        let user = BTreeMap::from([
            ("io.kubernetes.pod.name".to_owned(), "web-0".to_owned()),
            ("org.example.team".to_owned(), "infra".to_owned()),
        ]);
        let annotations = build(false, &user);
        assert_eq!(annotations["io.kubernetes.pod.name"], "web-0");
        assert_eq!(annotations["org.example.team"], "infra");
        assert_eq!(annotations.len(), DEFAULT_KEYS.len() + 1);
    }
}
