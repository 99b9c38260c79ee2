//! Watcher configuration, loadable from TOML.
//!
//! ```toml
//! debounce_ms = 1000
//! write_stability_ms = 100
//! heal_orphan_changes = true
//! database_path = "/var/lib/docwatch/documents.db"
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 50
//! max_delay_ms = 1000
//! max_total_ms = 5000
//!
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! "docwatch::watcher" = "debug"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DocError, DocResult};
use crate::store::RetryPolicy;
use crate::watcher::dispatcher::WriteStability;

const DATABASE_FILE: &str = "documents.db";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet window before a burst of change events is reconciled.
    pub debounce_ms: u64,
    /// Poll interval while waiting for a new file to stop growing. 0 disables the wait.
    pub write_stability_ms: u64,
    pub write_stability_timeout_ms: u64,
    /// Create a record when a change arrives for a path that has none.
    pub heal_orphan_changes: bool,
    pub database_path: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub logging: LoggingConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            write_stability_ms: 100,
            write_stability_timeout_ms: 2000,
            heal_orphan_changes: true,
            database_path: None,
            retry: RetryPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub default: String,
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: "warn".to_string(),
            modules: BTreeMap::new(),
        }
    }
}

impl WatchConfig {
    pub fn from_toml_str(raw: &str) -> DocResult<Self> {
        let config: WatchConfig =
            toml::from_str(raw).map_err(|e| DocError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> DocResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> DocResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(DocError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(DocError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn write_stability(&self) -> Option<WriteStability> {
        (self.write_stability_ms > 0).then(|| WriteStability {
            interval: Duration::from_millis(self.write_stability_ms),
            timeout: Duration::from_millis(self.write_stability_timeout_ms),
        })
    }

    /// The configured database file, or `documents.db` under the user's local data directory.
    pub fn resolved_database_path(&self) -> DocResult<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let base = dirs::data_local_dir()
            .ok_or_else(|| DocError::Config("local data directory not found".into()))?;
        Ok(base.join("docwatch").join(DATABASE_FILE))
    }
}
