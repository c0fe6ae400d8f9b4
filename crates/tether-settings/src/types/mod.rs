//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file only needs the keys it changes.

mod gateway;
mod session;

pub use gateway::*;
pub use session::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the gateway client.
///
/// ```json
/// {
///   "gateway": { "token": "...", "intents": 33281 },
///   "reconnect": { "maxRetries": 5 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Gateway endpoint and identify parameters.
    pub gateway: GatewaySettings,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatSettings,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Entity cache capacities.
    pub cache: CacheSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Reject settings that cannot produce a working session.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.token.trim().is_empty() {
            return Err(SettingsError::invalid("gateway.token", "must not be empty"));
        }
        let url = self.gateway.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SettingsError::invalid(
                "gateway.url",
                format!("expected a ws:// or wss:// URL, got {url}"),
            ));
        }
        check_fraction("heartbeat.jitter", self.heartbeat.jitter)?;
        check_fraction("reconnect.jitterFactor", self.reconnect.jitter_factor)?;
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(SettingsError::invalid(
                "reconnect.baseDelayMs",
                format!("exceeds reconnect.maxDelayMs ({})", self.reconnect.max_delay_ms),
            ));
        }
        Ok(())
    }
}

fn check_fraction(field: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::invalid(field, format!("must be within 0.0..=1.0, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TetherSettings {
        let mut settings = TetherSettings::default();
        settings.gateway.token = "token".into();
        settings
    }

    #[test]
    fn defaults_need_a_token() {
        let err = TetherSettings::default().validate().unwrap_err();
        assert!(err.to_string().contains("gateway.token"));
    }

    #[test]
    fn defaults_with_token_validate() {
        valid().validate().unwrap();
    }

    #[test]
    fn rejects_http_url() {
        let mut settings = valid();
        settings.gateway.url = "https://gateway.discord.gg".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("ws://"));
    }

    #[test]
    fn rejects_out_of_range_jitter() {
        let mut settings = valid();
        settings.heartbeat.jitter = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = valid();
        settings.reconnect.jitter_factor = -0.1;
        let err = settings.validate().unwrap_err();
        assert_eq!(err.field(), Some("reconnect.jitterFactor"));
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let mut settings = valid();
        settings.reconnect.base_delay_ms = 120_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(TetherSettings::default()).unwrap();
        assert!(value["gateway"]["apiVersion"].is_number());
        assert!(value["reconnect"]["maxRetries"].is_number());
        assert!(value["cache"]["messages"].is_number());
    }
}
