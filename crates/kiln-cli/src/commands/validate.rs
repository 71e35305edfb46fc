use super::{json_pretty, load_config, load_registry, print_warnings, EXIT_SUCCESS};
use kiln_runtime::{probe, HostDevices, Relabel, RuntimeError, Synthesizer};
use std::path::Path;

/// Validation must leave bind-mount sources untouched.
struct SkipRelabel;

impl Relabel for SkipRelabel {
    fn relabel(&self, _path: &Path, _mount_label: &str, _shared: bool) -> Result<(), RuntimeError> {
        Ok(())
    }
}

pub fn run(config_path: &Path, registry_path: Option<&Path>, json: bool) -> Result<u8, String> {
    let config = load_config(config_path)?;
    let registry = load_registry(registry_path)?;
    let caps = probe();

    let out = Synthesizer::new(Box::new(HostDevices), Box::new(SkipRelabel))
        .generate(&config, &caps, &registry, false)
        .map_err(|e| e.to_string())?;

    if json {
        let report = serde_json::json!({
            "valid": true,
            "warnings": out.warnings,
            "digest": out.spec.digest().map_err(|e| e.to_string())?,
        });
        println!("{}", json_pretty(&report)?);
    } else {
        print_warnings(&out.warnings);
        let ok = console::Style::new().green().apply_to("✓");
        if out.warnings.is_empty() {
            println!("{ok} {} is valid", config_path.display());
        } else {
            println!(
                "{ok} {} is valid ({} setting(s) dropped on this host)",
                config_path.display(),
                out.warnings.len()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
