//! Application directory paths.
//!
//! Single source of truth for the filesystem locations used by the
//! scheduler. Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! # Environment Overrides
//!
//! - `PESTER_DATA_DIR` overrides [`data_dir`]
//! - `PESTER_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the task database. Resolves to `dirs::data_dir()/pester/` by
/// default. Override with the `PESTER_DATA_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PESTER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("pester"))
        .unwrap_or_else(|| PathBuf::from("/tmp/pester-data"))
}

/// Application config directory.
///
/// Holds `config.toml`. Resolves to `dirs::config_dir()/pester/` by
/// default. Override with the `PESTER_CONFIG_DIR` environment variable.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PESTER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("pester"))
        .unwrap_or_else(|| PathBuf::from("/tmp/pester-config"))
}
