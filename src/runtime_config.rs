// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry serde defaults so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_alerts_path() -> String {
    "alerts.json".to_string()
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_startup_delay_secs() -> u64 {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_rules_per_user() -> usize {
    8
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the funding sentinel.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Path of the durable alerts document.
    #[serde(default = "default_alerts_path")]
    pub alerts_path: String,

    /// Seconds between monitor cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds to wait after startup before the first monitor cycle.
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    /// Timeout applied to each funding-rate fetch and notification send.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Maximum number of distinct symbols a single user may track.
    #[serde(default = "default_max_rules_per_user")]
    pub max_rules_per_user: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            alerts_path: default_alerts_path(),
            poll_interval_secs: default_poll_interval_secs(),
            startup_delay_secs: default_startup_delay_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_rules_per_user: default_max_rules_per_user(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            poll_interval_secs = config.poll_interval_secs,
            alerts_path = %config.alerts_path,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        // Atomic write: write to a temporary sibling file, then rename.
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}
