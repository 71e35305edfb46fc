use super::{json_pretty, load_config, load_registry, print_warnings, EXIT_SUCCESS};
use kiln_runtime::{probe, Synthesizer};
use std::path::Path;
use tracing::debug;

pub fn run(
    config_path: &Path,
    output: Option<&Path>,
    registry_path: Option<&Path>,
    is_update: bool,
    json: bool,
) -> Result<u8, String> {
    let config = load_config(config_path)?;
    let registry = load_registry(registry_path)?;
    let caps = probe();
    debug!(layout = ?caps.cgroup_layout, "host probed");

    let out = Synthesizer::host()
        .generate(&config, &caps, &registry, is_update)
        .map_err(|e| e.to_string())?;
    let digest = out.spec.digest().map_err(|e| e.to_string())?;
    let spec_json = out.spec.to_json_pretty().map_err(|e| e.to_string())?;

    if let Some(path) = output {
        std::fs::write(path, format!("{spec_json}\n"))
            .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    }

    if json {
        let inline_spec = match output {
            Some(_) => None,
            None => Some(&out.spec),
        };
        let report = serde_json::json!({
            "digest": digest,
            "output": output.map(|p| p.display().to_string()),
            "warnings": out.warnings,
            "port_mappings": out.port_mappings,
            "spec": inline_spec,
        });
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    print_warnings(&out.warnings);
    match output {
        Some(path) => {
            println!("wrote {}", path.display());
            println!("digest: {digest}");
            for m in &out.port_mappings {
                let host_ports = match m.host_port_end {
                    Some(end) => format!("{}-{end}", m.host_port),
                    None => m.host_port.to_string(),
                };
                let ip = if m.host_ip.is_empty() { "*" } else { &m.host_ip };
                println!("port: {ip}:{host_ports} -> {}/{}", m.container_port, m.protocol);
            }
        }
        None => println!("{spec_json}"),
    }
    Ok(EXIT_SUCCESS)
}
