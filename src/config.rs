use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::{Priority, TaskFilter};
use crate::storage::StorageError;

pub const CONFIG_FILE: &str = "config.json";
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct DashboardConfig {
    /// Total bytes the key-value store may hold; `None` means unlimited.
    #[serde(default)]
    pub storage_quota_bytes: Option<u64>,
    #[serde(default)]
    pub default_priority: Priority,
    #[serde(default)]
    pub initial_filter: TaskFilter,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            storage_quota_bytes: None,
            default_priority: Priority::Medium,
            initial_filter: TaskFilter::All,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfigFile {
    pub schema_version: u32,
    pub config: DashboardConfig,
}

pub fn read_config(root: &Path) -> Result<DashboardConfig, StorageError> {
    let mut file = File::open(root.join(CONFIG_FILE))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    let parsed: ConfigFile = serde_json::from_str(&buf)?;
    Ok(parsed.config)
}

/// Missing or unreadable config is not fatal: the defaults apply.
pub fn load_config(root: &Path) -> DashboardConfig {
    match read_config(root) {
        Ok(config) => config,
        Err(StorageError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            DashboardConfig::default()
        }
        Err(err) => {
            log::warn!("config unreadable, using defaults: {err}");
            DashboardConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn config_default_values() {
        let config = DashboardConfig::default();
        assert_eq!(config.storage_quota_bytes, None);
        assert_eq!(config.default_priority, Priority::Medium);
        assert_eq!(config.initial_filter, TaskFilter::All);
    }

    #[test]
    fn config_serde_applies_defaults_for_missing_fields() {
        let json = r#"
        {
          "schema_version": 1,
          "config": { "storage_quota_bytes": 5242880 }
        }
        "#;
        let file: ConfigFile = serde_json::from_str(json).expect("config should deserialize");
        assert_eq!(file.schema_version, CONFIG_SCHEMA_VERSION);
        assert_eq!(file.config.storage_quota_bytes, Some(5 * 1024 * 1024));
        assert_eq!(file.config.default_priority, Priority::Medium);
        assert_eq!(file.config.initial_filter, TaskFilter::All);
    }

    #[test]
    fn load_config_reads_file_and_falls_back_on_missing_or_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config(dir.path()), DashboardConfig::default());

        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"schema_version":1,"config":{"default_priority":"high","initial_filter":"pending"}}"#,
        )
        .unwrap();
        let config = load_config(dir.path());
        assert_eq!(config.default_priority, Priority::High);
        assert_eq!(config.initial_filter, TaskFilter::Pending);

        fs::write(dir.path().join(CONFIG_FILE), b"{not json").unwrap();
        assert!(read_config(dir.path()).is_err());
        assert_eq!(load_config(dir.path()), DashboardConfig::default());
    }
}
