//! Gateway endpoint and identify settings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `GUILDS | GUILD_MESSAGES`.
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 9);

/// Where to connect and how to identify.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Base WebSocket URL, without query string.
    pub url: String,
    /// Gateway API version appended as `?v=`.
    pub api_version: u8,
    /// Authentication token.
    pub token: String,
    /// Intents bitfield sent with Identify.
    pub intents: u64,
    /// Member count above which offline members are omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,
    /// Client description sent with Identify.
    pub properties: PropertiesSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "wss://gateway.discord.gg".to_string(),
            api_version: 10,
            token: String::new(),
            intents: DEFAULT_INTENTS,
            large_threshold: None,
            properties: PropertiesSettings::default(),
        }
    }
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("url", &self.url)
            .field("api_version", &self.api_version)
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("large_threshold", &self.large_threshold)
            .field("properties", &self.properties)
            .finish()
    }
}

impl GatewaySettings {
    /// Full connection URL for `base` (the configured URL or a resume URL).
    pub fn connect_url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        format!("{base}/?v={}&encoding=json", self.api_version)
    }
}

/// Client description (`os`, `browser`, `device`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertiesSettings {
    /// Operating system.
    pub os: String,
    /// Library name.
    pub browser: String,
    /// Device name.
    pub device: String,
}

impl Default for PropertiesSettings {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "tether".to_string(),
            device: "tether".to_string(),
        }
    }
}
