/// Configuration for history engines and the durable store.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Maximum number of entries kept on each of the undo and redo stacks.
const DEFAULT_MAX_STACK_SIZE: usize = 50;

/// Persisted histories untouched for longer than this are removed by cleanup.
const DEFAULT_MAX_AGE_DAYS: u32 = 30;

/// File name of the history database inside the data directory.
const DATABASE_FILE: &str = "history.redb";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "EDIT_HISTORY_DATA_DIR";

/// Per-engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Capacity of each stack. Oldest undo entries are evicted beyond this.
    pub max_stack_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
        }
    }
}

impl HistoryConfig {
    /// Creates a config with the given stack capacity.
    pub fn with_max_stack_size(max_stack_size: usize) -> Self {
        Self { max_stack_size }.sanitized()
    }

    /// Clamps values that would make the engine unusable.
    pub fn sanitized(mut self) -> Self {
        self.max_stack_size = self.max_stack_size.max(1);
        self
    }
}

/// Configuration for the durable history store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the history database.
    pub data_dir: PathBuf,
    /// Age in days after which `cleanup_old_history` removes a record.
    pub max_age_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: resolve_data_dir(),
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }
}

impl StoreConfig {
    /// Creates a config rooted at `data_dir` with default retention.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }

    /// Full path of the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Loads config from a JSON file.
    /// Returns defaults on any error (missing file, parse error, etc.).
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<StoreConfig>(&contents) {
                Ok(config) => config.sanitized(),
                Err(e) => {
                    tracing::warn!("Failed to parse store config at {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read store config at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Writes config to `path` as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let json = serde_json::to_string_pretty(self).context("Failed to serialize store config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write store config: {}", path.display()))?;
        Ok(())
    }

    /// Clamps retention to at least one day.
    pub fn sanitized(mut self) -> Self {
        self.max_age_days = self.max_age_days.max(1);
        self
    }
}

/// Resolves the data directory path.
///
/// Resolution order:
/// 1. `EDIT_HISTORY_DATA_DIR` environment variable
/// 2. `edit-history/` under the platform's local data directory
/// 3. `.data/` relative to the working directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("edit-history"))
        .unwrap_or_else(|| PathBuf::from(".data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_history_config() {
        let config = HistoryConfig::default();
        assert_eq!(config.max_stack_size, 50);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(HistoryConfig::with_max_stack_size(0).max_stack_size, 1);
    }

    #[test]
    fn test_database_path_is_inside_data_dir() {
        let config = StoreConfig::in_dir("/tmp/history-data");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/history-data/history.redb")
        );
        assert_eq!(config.max_age_days, 30);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().expect("create temp dir");
        let config = StoreConfig::load_or_default(&dir.path().join("absent.json"));
        assert_eq!(config.max_age_days, 30);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("store.json");
        let config = StoreConfig {
            data_dir: dir.path().join("data"),
            max_age_days: 7,
        };
        config.save(&path).expect("save");

        let loaded = StoreConfig::load_or_default(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults_and_sanitizes() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{ "max_age_days": 0 }"#).expect("write");

        let loaded = StoreConfig::load_or_default(&path);
        assert_eq!(loaded.max_age_days, 1);
    }

    #[test]
    fn test_garbage_file_returns_defaults() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json at all").expect("write");

        let loaded = StoreConfig::load_or_default(&path);
        assert_eq!(loaded.max_age_days, 30);
    }
}
