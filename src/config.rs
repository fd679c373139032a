//! Configuration for the nudge daemon.
//!
//! Every section is optional in the TOML file; missing fields take their
//! defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::callback::CallbackConfig;
use crate::error::NudgeError;
use crate::ledger::LedgerConfig;
use crate::notify::{NtfyConfig, VoiceConfig};
use crate::scheduler::SchedulerConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NudgeConfig {
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub ntfy: NtfyConfig,
    pub voice: VoiceConfig,
    pub ledger: LedgerConfig,
    pub callback: CallbackConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file shared by the reminder store and the ledger.
    /// Defaults to `<data_dir>/nudge.db`.
    pub db_path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn effective_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(crate::nudge_dirs::default_db_path)
    }
}

impl NudgeConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| NudgeError::Config(e.to_string()))
    }

    /// Load `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| NudgeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`<config_dir>/config.toml`).
    pub fn default_config_path() -> PathBuf {
        crate::nudge_dirs::config_file()
    }
}
