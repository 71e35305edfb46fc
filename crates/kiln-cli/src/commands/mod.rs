pub mod generate;
pub mod probe;
pub mod validate;

use kiln_runtime::StaticRegistry;
use kiln_schema::{parse_config_file, CreateConfig};
use std::path::Path;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;

const CONFIG_ERROR_PREFIX: &str = "config error:";

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Map an error message to the process exit code.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with(CONFIG_ERROR_PREFIX) {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub fn load_config(path: &Path) -> Result<CreateConfig, String> {
    parse_config_file(path).map_err(|e| format!("{CONFIG_ERROR_PREFIX} {}: {e}", path.display()))
}

/// Containers that `container:<ref>` namespace directives may join.
pub fn load_registry(path: Option<&Path>) -> Result<StaticRegistry, String> {
    match path {
        Some(p) => StaticRegistry::load(p)
            .map_err(|e| format!("failed to load registry {}: {e}", p.display())),
        None => Ok(StaticRegistry::new()),
    }
}

pub fn print_warnings(warnings: &[String]) {
    let style = console::Style::new().yellow();
    for w in warnings {
        eprintln!("{} {w}", style.apply_to("warning:"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_get_their_own_exit_code() {
        assert_eq!(
            exit_code_for("config error: kiln.toml: failed to parse config: bad"),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(exit_code_for("invalid ulimit 'x': unknown"), EXIT_FAILURE);
    }

    #[test]
    fn missing_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_ERROR);
        assert!(err.contains("absent.toml"), "{err}");
    }

    #[test]
    fn no_registry_path_means_empty_registry() {
        assert!(load_registry(None).is_ok());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("containers.json");
        std::fs::write(&path, "not json").unwrap();
        let err = load_registry(Some(&path)).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_FAILURE);
    }
}
