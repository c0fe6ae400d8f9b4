//! Where settings come from.
//!
//! Three layers, later ones winning: compiled defaults, the JSON file at
//! [`settings_path`], then `TETHER_*` environment variables. The file is
//! merged into the defaults as JSON before deserializing, so it only needs
//! the keys it changes. Nested objects merge key by key; arrays and scalars
//! replace; `null` leaves the lower layer alone.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// `~/.tether/settings.json`, or under the temp dir when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join(".tether")
        .join("settings.json")
}

/// [`load_settings_from_path`] at [`settings_path`].
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, then the file at `path` if there is one, then the environment.
///
/// An unreadable file or invalid JSON is an error naming the file.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<TetherSettings> {
    let mut merged = serde_json::to_value(TetherSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let layer: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = %path.display(), "settings file loaded");
            merge_layer(&mut merged, layer);
        }
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    Ok(serde_json::from_value(merged)?)
}

/// Merge `layer` into `base` in place.
pub fn merge_layer(base: &mut Value, layer: Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_layer(existing, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Apply `TETHER_*` overrides from the process environment.
///
/// Values that do not parse, or fall outside their range, are logged and
/// skipped.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides(settings, &Env::new(|name| std::env::var(name).ok()));
}

/// Environment lookup with typed accessors.
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Non-empty string value.
    fn text(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn bounded(&self, name: &str, range: RangeInclusive<u64>) -> Option<u64> {
        let raw = (self.lookup)(name)?;
        let parsed = parse_bounded(&raw, &range);
        if parsed.is_none() {
            warn!(key = name, value = %raw, min = range.start(), max = range.end(), "ignoring out-of-range env override");
        }
        parsed
    }

    fn flag(&self, name: &str) -> Option<bool> {
        let raw = (self.lookup)(name)?;
        let parsed = parse_flag(&raw);
        if parsed.is_none() {
            warn!(key = name, value = %raw, "ignoring non-boolean env override");
        }
        parsed
    }
}

fn apply_overrides<F: Fn(&str) -> Option<String>>(settings: &mut TetherSettings, env: &Env<F>) {
    let gateway = &mut settings.gateway;
    if let Some(token) = env.text("TETHER_TOKEN") {
        gateway.token = token;
    }
    if let Some(url) = env.text("TETHER_GATEWAY_URL") {
        gateway.url = url;
    }
    if let Some(intents) = env.bounded("TETHER_INTENTS", 0..=u64::from(u32::MAX)) {
        gateway.intents = intents;
    }
    if let Some(version) = env.bounded("TETHER_API_VERSION", 6..=10).and_then(|v| u8::try_from(v).ok()) {
        gateway.api_version = version;
    }

    if let Some(retries) = env.bounded("TETHER_MAX_RECONNECTS", 0..=1_000).and_then(|v| u32::try_from(v).ok()) {
        settings.reconnect.max_retries = retries;
    }

    if let Some(level) = env.text("TETHER_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(json) = env.flag("TETHER_LOG_JSON") {
        settings.logging.json = json;
    }
}

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case, surrounding
/// whitespace ignored.
pub fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    let is = |options: [&str; 4]| options.iter().any(|o| raw.eq_ignore_ascii_case(o));
    if is(["true", "1", "yes", "on"]) {
        Some(true)
    } else if is(["false", "0", "no", "off"]) {
        Some(false)
    } else {
        None
    }
}

/// Decimal integer inside `range`.
pub fn parse_bounded(raw: &str, range: &RangeInclusive<u64>) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|n| range.contains(n))
}
