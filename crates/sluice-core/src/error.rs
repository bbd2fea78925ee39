use crate::build::BuildError;
use crate::config::ConfigError;
use crate::dev::DevError;
use thiserror::Error;

/// Core error type for sluice operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Dev(#[from] DevError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code of the underlying failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Build(e) => e.code,
            Self::Dev(e) => e.code(),
            Self::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::codes;

    #[test]
    fn test_codes_pass_through() {
        let err: Error = ConfigError::UnknownMode {
            mode: "staging".to_string(),
        }
        .into();
        assert_eq!(err.code(), "CONFIG_UNKNOWN_MODE");
        assert!(err.to_string().contains("staging"));

        let err: Error = BuildError::new(codes::BUILD_ENTRY_NOT_FOUND, "missing").into();
        assert_eq!(err.code(), codes::BUILD_ENTRY_NOT_FOUND);

        let err: Error = DevError::PortUnavailable { port: 8081 }.into();
        assert_eq!(err.code(), "DEV_PORT_UNAVAILABLE");
        assert_eq!(err.to_string(), "port 8081 is already in use");
    }
}
