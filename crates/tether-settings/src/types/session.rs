//! Heartbeat, reconnect, cache, and logging settings.

use serde::{Deserialize, Serialize};

/// Heartbeat timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Fraction (0.0–1.0) of the interval by which the first beat may be
    /// pulled forward. 1.0 spreads the first beat over the whole interval.
    pub jitter: f64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self { jitter: 1.0 }
    }
}

/// Backoff for repeated connection failures during a reconnect.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Attempts after the first failure before giving up.
    pub max_retries: u32,
    /// Base delay in milliseconds, doubled per attempt.
    pub base_delay_ms: u64,
    /// Cap on a single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0–1.0) applied symmetrically to each delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter_factor: 0.2,
        }
    }
}

/// Per-kind entity cache capacity. `0` disables the cap for that kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Guild capacity.
    pub guilds: usize,
    /// Channel capacity.
    pub channels: usize,
    /// Role capacity.
    pub roles: usize,
    /// User capacity.
    pub users: usize,
    /// Message capacity.
    pub messages: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            guilds: 10_000,
            channels: 10_000,
            roles: 10_000,
            users: 10_000,
            messages: 1_000,
        }
    }
}

impl CacheSettings {
    /// Map a configured value to a store capacity (`0` becomes unbounded).
    pub fn bound(value: usize) -> Option<usize> {
        (value > 0).then_some(value)
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
