//! Loading the engine configuration from a TOML file.
//!
//! With no `--config` flag the `SEARCHSYNC_CONFIG` environment variable is
//! consulted; with neither, the built-in catalogue is used.

use std::path::{Path, PathBuf};

use searchsync_engine::EngineConfig;

pub(crate) const CONFIG_ENV: &str = "SEARCHSYNC_CONFIG";

/// Resolve the config path: explicit flag first, then the environment.
pub(crate) fn config_path(flag: Option<&Path>) -> Option<PathBuf> {
    flag.map(Path::to_path_buf).or_else(|| {
        std::env::var_os(CONFIG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    })
}

/// Read, parse and validate a config file.
pub(crate) fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
            parse_config(&content)
                .map_err(|e| format!("could not parse '{}': {}", path.display(), e))?
        }
        None => EngineConfig::default(),
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<EngineConfig, toml::de::Error> {
    toml::from_str(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default_catalogue() {
        let config = parse_config("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn scalar_overrides_keep_default_catalogue() {
        let config = parse_config("queue_capacity = 8\nlog_level = \"debug\"\n").unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.indexes, EngineConfig::default().indexes);
    }

    #[test]
    fn explicit_catalogue_replaces_default() {
        let config = parse_config(
            r#"
global_alias = "everything"
hierarchy = []
references = []

[[indexes]]
entity_type = "table"
index_name = "tables"
"#,
        )
        .unwrap();
        assert_eq!(config.global_alias, "everything");
        assert_eq!(config.indexes.len(), 1);
        assert_eq!(config.indexes[0].alias(), "table");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_value_types_are_rejected() {
        assert!(parse_config("queue_capacity = \"lots\"").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Some(Path::new("/nonexistent/searchsync.toml"))).unwrap_err();
        assert!(err.contains("could not read '/nonexistent/searchsync.toml'"));
    }

    #[test]
    fn zero_capacity_fails_validation() {
        let dir = std::env::temp_dir().join(format!("searchsync-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("zero.toml");
        std::fs::write(&path, "queue_capacity = 0\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.starts_with("invalid configuration"), "{err}");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
