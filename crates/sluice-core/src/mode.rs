//! Build mode selection.
//!
//! A run is either a development or a production run. Everything mode-dependent
//! in the resolved configuration (minification, sourcemaps) derives from this
//! value alone.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The active build mode for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Readable output, no sourcemaps.
    #[default]
    Development,
    /// Minified output with sourcemaps.
    Production,
}

/// How a mode string that is neither `development` nor `production` is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModePolicy {
    /// Unknown modes are a configuration error.
    #[default]
    Strict,
    /// Unknown modes behave as development.
    Lenient,
}

impl BuildMode {
    /// Turn a raw mode input into a `BuildMode`.
    ///
    /// An absent mode is development. Matching is exact (`"Production"` is an
    /// unknown mode).
    pub fn from_input(raw: Option<&str>, policy: ModePolicy) -> Result<Self, ConfigError> {
        let Some(raw) = raw else {
            return Ok(Self::Development);
        };

        match raw.parse::<Self>() {
            Ok(mode) => Ok(mode),
            Err(err) => match policy {
                ModePolicy::Strict => Err(err),
                ModePolicy::Lenient => {
                    tracing::warn!(mode = raw, "unknown mode, falling back to development");
                    Ok(Self::Development)
                }
            },
        }
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    /// Whether this is a production run.
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for BuildMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(ConfigError::UnknownMode {
                mode: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
