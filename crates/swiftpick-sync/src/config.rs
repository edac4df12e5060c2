//! Sync engine configuration.
//!
//! Every interval and retry constant the engine uses lives here with a
//! documented default, so the app can tune them without code changes. The
//! defaults match the behavior observed in the shipped screens: 5s pickup
//! polling, 8s stats polling, 10s bus location polling, 5s drain safety net.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SyncError};

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the SwiftPick API, e.g. `https://api.swiftpick.example`.
    pub api_base: String,

    /// Pickup status poll interval, milliseconds.
    #[serde(default = "default_pickup_poll_ms")]
    pub pickup_poll_ms: u64,
    /// Admin stats poll interval, milliseconds.
    #[serde(default = "default_stats_poll_ms")]
    pub stats_poll_ms: u64,
    /// Bus location poll interval, milliseconds.
    #[serde(default = "default_bus_poll_ms")]
    pub bus_poll_ms: u64,

    /// Safety-net drain interval while online, milliseconds.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    /// Per-request timeout, milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Exponential backoff base delay, milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Exponential backoff cap, milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Attempts before an action is declared dead and surfaced as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Minimum time a connectivity reading must hold before it is published.
    #[serde(default = "default_debounce_ms")]
    pub connectivity_debounce_ms: u64,

    /// How long Done queue entries are retained for audit before GC, seconds.
    #[serde(default = "default_done_retention_secs")]
    pub done_retention_secs: u64,
}

fn default_pickup_poll_ms() -> u64 {
    5_000
}

fn default_stats_poll_ms() -> u64 {
    8_000
}

fn default_bus_poll_ms() -> u64 {
    10_000
}

fn default_drain_interval_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_done_retention_secs() -> u64 {
    86_400
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            pickup_poll_ms: default_pickup_poll_ms(),
            stats_poll_ms: default_stats_poll_ms(),
            bus_poll_ms: default_bus_poll_ms(),
            drain_interval_ms: default_drain_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_attempts: default_max_attempts(),
            connectivity_debounce_ms: default_debounce_ms(),
            done_retention_secs: default_done_retention_secs(),
        }
    }
}

impl SyncConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SyncError::Store(format!(
                "config not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: SyncConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Duration accessors
    // -----------------------------------------------------------------------

    pub fn poll_interval(&self, kind: crate::types::EntityKind) -> Duration {
        use crate::types::EntityKind;
        let ms = match kind {
            EntityKind::Pickup | EntityKind::Trip => self.pickup_poll_ms,
            EntityKind::BusLocation => self.bus_poll_ms,
            EntityKind::AdminStats => self.stats_poll_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn connectivity_debounce(&self) -> Duration {
        Duration::from_millis(self.connectivity_debounce_ms)
    }

    pub fn done_retention(&self) -> Duration {
        Duration::from_secs(self.done_retention_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_observed_intervals() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.pickup_poll_ms, 5_000);
        assert_eq!(cfg.stats_poll_ms, 8_000);
        assert_eq!(cfg.bus_poll_ms, 10_000);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.backoff_base(), Duration::from_secs(1));
        assert_eq!(cfg.backoff_cap(), Duration::from_secs(60));
    }

    #[test]
    fn poll_interval_per_kind() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.poll_interval(EntityKind::Pickup), Duration::from_secs(5));
        assert_eq!(
            cfg.poll_interval(EntityKind::AdminStats),
            Duration::from_secs(8)
        );
        assert_eq!(
            cfg.poll_interval(EntityKind::BusLocation),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn yaml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("swiftpick.yaml");
        let cfg = SyncConfig::new("https://api.swiftpick.example");
        cfg.save(&path).unwrap();
        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let yaml = "api_base: https://api.swiftpick.example\npickup_poll_ms: 2000\n";
        let cfg: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.pickup_poll_ms, 2_000);
        assert_eq!(cfg.stats_poll_ms, 8_000);
        assert_eq!(cfg.max_attempts, 5);
    }

    #[test]
    fn load_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(SyncConfig::load(&dir.path().join("nope.yaml")).is_err());
    }
}
