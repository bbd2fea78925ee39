#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod build;
pub mod bundler;
pub mod compiler;
pub mod config;
pub mod css;
pub mod dev;
pub mod error;
pub mod mode;
pub mod version;

pub use build::{build, Artifact, ArtifactKind, ArtifactSet, BuildError};
pub use config::{load_config, resolve, resolve_defaults, ConfigError, ResolvedConfig, UserConfig};
pub use dev::{DevError, DevServer, DevServerHandle};
pub use error::Error;
pub use mode::{BuildMode, ModePolicy};
pub use version::VERSION;
