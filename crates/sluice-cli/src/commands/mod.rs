pub mod build;
pub mod config;
pub mod dev;
pub mod version;

use miette::Result;
use sluice_core::{load_config, resolve, BuildMode, ModePolicy, ResolvedConfig, UserConfig};
use std::path::PathBuf;
use tracing::info;

/// Global flags shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub cwd: PathBuf,
    /// Explicit `--config` file.
    pub config_file: Option<PathBuf>,
    /// Raw `--mode` / `SLUICE_MODE` value.
    pub mode: Option<String>,
    pub policy: ModePolicy,
    pub json: bool,
}

impl Context {
    /// Resolve the configuration; `default_mode` applies when no mode was given.
    pub fn resolve(&self, default_mode: BuildMode) -> Result<ResolvedConfig> {
        let raw = self.mode.as_deref().unwrap_or(default_mode.as_str());
        let mode = BuildMode::from_input(Some(raw), self.policy).map_err(report)?;

        let user = match load_config(&self.cwd, self.config_file.as_deref()).map_err(report)? {
            Some((path, user)) => {
                let shown = path.strip_prefix(&self.cwd).unwrap_or(&path);
                info!(path = %shown.display(), "loaded config");
                user
            }
            None => UserConfig::default(),
        };

        resolve(mode, &user, &self.cwd).map_err(report)
    }
}

/// Render a library error with its stable code first.
pub fn report(err: impl Into<sluice_core::Error>) -> miette::Report {
    let err: sluice_core::Error = err.into();
    let message = err.to_string();
    if message.starts_with(err.code()) {
        miette::miette!("{message}")
    } else {
        miette::miette!("{}: {message}", err.code())
    }
}
