//! Configuration resolution.
//!
//! A run's configuration is a pure function of the static defaults below, the
//! optional config file ([`load_config`], parsed into a [`UserConfig`]) and the
//! [`BuildMode`]. [`resolve`] folds them into a [`ResolvedConfig`]; the CLI
//! then applies its server flags on top.

mod file;
mod resolve;
mod user;

pub use file::{find_config_file, load_config, CONFIG_FILES};
pub use resolve::{resolve, resolve_defaults};
pub use user::{
    ProxyOptions, ProxyTable, ProxyValue, PublicDirValue, UserBuildConfig, UserConfig,
    UserLibConfig, UserResolveConfig, UserServerConfig,
};

use crate::mode::BuildMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Source root, relative to the project directory.
pub const DEFAULT_ROOT: &str = "internal/ts-client";
/// Entry module, relative to the source root.
pub const DEFAULT_ENTRY: &str = "client.ts";
/// Library export name and base file name.
pub const DEFAULT_LIB_NAME: &str = "client";
/// Output directory, relative to the source root.
pub const DEFAULT_OUT_DIR: &str = "../static/build";
/// Public directory, relative to the source root.
pub const DEFAULT_PUBLIC_DIR: &str = "public";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8081;
/// Default `(prefix, target)` proxy rule: API traffic goes to the backend.
pub const DEFAULT_PROXY: (&str, &str) = ("/api", "http://localhost:8080");
/// Default import alias table.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[("htmx", "htmx.org")];

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown mode '{mode}' (expected 'development' or 'production')")]
    UnknownMode { mode: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config file {}: {message}", path.display())]
    Unsupported { path: PathBuf, message: String },

    #[error("invalid proxy rule '{prefix}': {message}")]
    InvalidProxy { prefix: String, message: String },

    #[error("invalid library name '{name}': expected a JavaScript identifier")]
    InvalidLibName { name: String },

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: &'static str, message: String },
}

impl ConfigError {
    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownMode { .. } => "CONFIG_UNKNOWN_MODE",
            Self::NotFound { .. } => "CONFIG_NOT_FOUND",
            Self::Read { .. } => "CONFIG_READ_ERROR",
            Self::Parse { .. } => "CONFIG_PARSE_ERROR",
            Self::Unsupported { .. } => "CONFIG_UNSUPPORTED",
            Self::InvalidProxy { .. } => "CONFIG_INVALID_PROXY",
            Self::InvalidLibName { .. } => "CONFIG_INVALID_LIB_NAME",
            Self::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
        }
    }
}

/// Both configuration records for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub mode: BuildMode,
    /// Directory the config was resolved against (the `--cwd`).
    pub project_dir: PathBuf,
    pub build: BuildConfiguration,
    pub server: DevServerConfiguration,
}

/// Library output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibFormat {
    /// ES module re-exporting the entry's exports.
    Es,
    /// UMD wrapper assigning the global `lib.name`.
    Umd,
    /// CommonJS `module.exports`.
    Cjs,
    /// Browser script assigning `var <name>`.
    Iife,
}

impl LibFormat {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Es => "es",
            Self::Umd => "umd",
            Self::Cjs => "cjs",
            Self::Iife => "iife",
        }
    }

    /// Artifact file name for this format.
    #[must_use]
    pub fn file_name(&self, base: &str) -> String {
        match self {
            Self::Es => format!("{base}.js"),
            Self::Umd => format!("{base}.umd.cjs"),
            Self::Cjs => format!("{base}.cjs"),
            Self::Iife => format!("{base}.iife.js"),
        }
    }
}

impl std::fmt::Display for LibFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Library artifact naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibConfig {
    /// Logical export name (global name for UMD/IIFE).
    pub name: String,
    /// Base file name of every artifact.
    pub file_name: String,
    /// Formats to emit, in order.
    pub formats: Vec<LibFormat>,
}

/// Everything the build path needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildConfiguration {
    /// Absolute source root.
    pub root: PathBuf,
    /// Entry module, relative to `root`.
    pub entry: PathBuf,
    pub lib: LibConfig,
    /// Absolute output directory.
    pub out_dir: PathBuf,
    pub minify: bool,
    pub sourcemap: bool,
    /// Import alias → module target. Relative targets are relative to `root`.
    pub alias: BTreeMap<String, String>,
    /// Replace the output directory wholesale instead of writing into it.
    pub empty_out_dir: bool,
}

impl BuildConfiguration {
    /// Absolute path of the entry module.
    #[must_use]
    pub fn entry_path(&self) -> PathBuf {
        self.root.join(&self.entry)
    }
}

/// A URL-prefix proxy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRule {
    /// Path prefix, always starting with `/`.
    pub prefix: String,
    /// Backend origin (may carry a base path).
    pub target: Url,
    /// Rewrite the `Host` header to the target's authority.
    pub change_origin: bool,
}

impl ProxyRule {
    /// Plain string-prefix match on the request path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Everything the dev-serve path needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DevServerConfiguration {
    pub host: String,
    pub port: u16,
    /// Fail instead of trying the next port when `port` is taken.
    pub strict_port: bool,
    /// Launch the system browser once listening.
    pub open: bool,
    pub cors: bool,
    /// Proxy rules in configuration order; the first match wins.
    pub proxy: Vec<ProxyRule>,
    /// Directory served as-is at `/`, if any.
    pub public_dir: Option<PathBuf>,
}

/// Resolve `path` against `base` unless it is already absolute.
pub(crate) fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        sluice_util::fs::normalize(path)
    } else {
        sluice_util::fs::normalize(&base.join(path))
    }
}
