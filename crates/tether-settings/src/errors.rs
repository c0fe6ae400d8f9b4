//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON, or does not fit the schema.
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying JSON failure.
        #[source]
        source: serde_json::Error,
    },

    /// Merged settings did not deserialize.
    #[error("settings do not fit the schema: {0}")]
    Schema(#[from] serde_json::Error),

    /// A field holds a value no session can work with.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted camelCase path of the field, e.g. `gateway.token`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The offending field, for validation failures.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
