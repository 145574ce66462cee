//! Configuration types for the reminder scheduler.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chrono::FixedOffset;

use crate::error::{ReminderError, Result};

/// Top-level configuration for the scheduler daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Push gateway settings.
    pub gateway: GatewayConfig,
    /// Fixed-offset timezone for cron evaluation: `"UTC"`, `"+02:00"`, `"-05:30"`.
    pub timezone: String,
    /// Data directory override (None = platform default).
    pub data_dir: Option<PathBuf>,
    /// What to do with deadlines that passed while the daemon was down.
    pub missed_fires: MissedFirePolicy,
    /// Fire-history rows retained per task.
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            timezone: "UTC".to_owned(),
            data_dir: None,
            missed_fires: MissedFirePolicy::default(),
            history_limit: 200,
        }
    }
}

/// ntfy-compatible push gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL; the topic is appended as a path segment.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ntfy.sh".to_owned(),
            timeout_secs: 10,
        }
    }
}

/// Policy for fire deadlines that elapsed while the process was not running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedFirePolicy {
    /// Drop missed deadlines and schedule from now.
    #[default]
    Skip,
    /// Fire once immediately for a missed deadline, then resume the schedule.
    CatchUp,
}

impl SchedulerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ReminderError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be
    /// serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ReminderError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `{config_dir}/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_dir().join("config.toml")
    }

    /// Parse the configured timezone into a fixed offset.
    ///
    /// Accepts `"UTC"` (any case), `"Z"`, and `"+HH:MM"` / `"-HH:MM"` strings.
    pub fn parsed_timezone(&self) -> Result<FixedOffset> {
        parse_fixed_offset(&self.timezone).ok_or_else(|| {
            ReminderError::Config(format!(
                "invalid timezone {:?}: expected \"UTC\" or an offset like \"+02:00\"",
                self.timezone
            ))
        })
    }

    /// Resolve the data root directory.
    #[must_use]
    pub fn data_root(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(crate::paths::data_dir)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an injected variable lookup.
    ///
    /// Recognized variables: `NTFY_URL` (gateway base URL), `PESTER_TZ`
    /// (timezone), `PESTER_DATA_DIR` (data directory).
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("NTFY_URL") {
            self.gateway.base_url = url;
        }
        if let Some(tz) = get("PESTER_TZ") {
            self.timezone = tz;
        }
        if let Some(dir) = get("PESTER_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }
}

fn parse_fixed_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match s.as_bytes()[0] {
        b'+' => (1i32, &s[1..]),
        b'-' => (-1i32, &s[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
