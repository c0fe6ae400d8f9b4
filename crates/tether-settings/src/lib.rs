//! # tether-settings
//!
//! Layered configuration for the gateway client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! ```no_run
//! let settings = tether_settings::load_settings()?;
//! settings.validate()?;
//! println!("connecting to {}", settings.gateway.url);
//! # Ok::<(), tether_settings::SettingsError>(())
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, load_settings, load_settings_from_path, merge_layer, settings_path};
pub use types::*;
