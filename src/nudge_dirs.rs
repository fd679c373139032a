//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate locations.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data (database) | `~/Library/Application Support/nudge/` | `~/.local/share/nudge/` |
//! | Config | `~/Library/Application Support/nudge/` | `~/.config/nudge/` |
//!
//! # Environment Overrides
//!
//! - `NUDGE_DATA_DIR` overrides [`data_dir`]
//! - `NUDGE_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root. Holds the SQLite database.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("NUDGE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("nudge"))
        .unwrap_or_else(|| PathBuf::from("/tmp/nudge-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("NUDGE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("nudge"))
        .unwrap_or_else(|| PathBuf::from("/tmp/nudge-config"))
}

/// Reminder store and ledger database (`data_dir()/nudge.db`).
#[must_use]
pub fn default_db_path() -> PathBuf {
    data_dir().join("nudge.db")
}

/// Config file (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
