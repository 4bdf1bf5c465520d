// crates/core/src/config.rs
//! User configuration: a small JSON document at `~/.claude/ledger_config.json`.
//!
//! Persisted outside the main database so it survives database resets. Read
//! at every storage-engine entry point (resolution is cheap); written only by
//! explicit `config set` operations.

use crate::error::ConfigError;
use crate::types::TimezoneMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CONFIG_FILE_NAME: &str = "ledger_config.json";

fn default_refresh_interval() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Explicit database file path; overrides every other resolution tier.
    pub db_path: Option<PathBuf>,
    /// Display name for this machine; defaults to the hostname.
    pub machine_name: Option<String>,
    /// Calendar-day bucketing mode for aggregates.
    pub timezone: TimezoneMode,
    /// Seconds between background limits refreshes.
    pub refresh_interval_secs: u64,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            machine_name: None,
            timezone: TimezoneMode::default(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl UserConfig {
    /// Config file location: `~/.claude/ledger_config.json`.
    pub fn path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".claude").join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::HomeDirNotFound)
    }

    /// Load the config, falling back to defaults when the file is missing or
    /// unreadable (a corrupt config never blocks the tool).
    pub fn load() -> Self {
        let path = match Self::path() {
            Ok(p) => p,
            Err(_) => return Self::default(),
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt config at {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_owned(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_owned(),
            source,
        })
    }

    /// Display label for this machine: configured name, or the hostname.
    pub fn machine_label(&self) -> String {
        self.machine_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = UserConfig::default();
        assert_eq!(config.db_path, None);
        assert_eq!(config.timezone, TimezoneMode::Local);
        assert_eq!(config.refresh_interval_secs, 60);
    }

    #[test]
    fn test_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger_config.json");

        let config = UserConfig {
            db_path: Some(PathBuf::from("/tmp/db.sqlite")),
            machine_name: Some("desktop".into()),
            timezone: TimezoneMode::Utc,
            refresh_interval_secs: 120,
        };
        config.save_to(&path).unwrap();

        let loaded = UserConfig::load_from(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let loaded = UserConfig::load_from(std::path::Path::new("/nonexistent/config.json"));
        assert_eq!(loaded, UserConfig::default());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger_config.json");
        std::fs::write(&path, "{not valid json").unwrap();

        let loaded = UserConfig::load_from(&path);
        assert_eq!(loaded, UserConfig::default());
    }

    #[test]
    fn test_unknown_keys_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger_config.json");
        std::fs::write(
            &path,
            r#"{"timezone":"utc","some_future_option":true}"#,
        )
        .unwrap();

        let loaded = UserConfig::load_from(&path);
        assert_eq!(loaded.timezone, TimezoneMode::Utc);
    }

    #[test]
    fn test_machine_label_prefers_config() {
        let config = UserConfig {
            machine_name: Some("laptop-01".into()),
            ..UserConfig::default()
        };
        assert_eq!(config.machine_label(), "laptop-01");

        let config = UserConfig::default();
        assert!(!config.machine_label().is_empty());
    }
}
