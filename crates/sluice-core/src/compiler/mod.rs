//! Script compilation.
//!
//! The bundler and the dev server never call SWC directly; they go through
//! [`CompilerBackend`], which turns one TypeScript or JavaScript module into
//! plain ES module JavaScript for browsers with native module support.

mod swc;

pub use swc::SwcBackend;

use std::fmt::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions a backend compiles.
pub const SCRIPT_EXTENSIONS: &[&str] = &["ts", "mts", "cts", "js", "mjs", "cjs"];

/// Check whether `path` is a script module the backend compiles.
#[must_use]
pub fn is_script(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Options for compiling one module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranspileSpec {
    /// Path of the source file; its extension selects TypeScript or JavaScript.
    pub input_path: PathBuf,
    /// Return a source map next to the code.
    pub sourcemap: bool,
    /// Emit without whitespace or comments.
    pub minify: bool,
}

impl TranspileSpec {
    #[must_use]
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sourcemap(mut self, sourcemap: bool) -> Self {
        self.sourcemap = sourcemap;
        self
    }

    #[must_use]
    pub fn with_minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }
}

/// Compiled module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileOutput {
    pub code: String,
    /// Source map JSON, when requested.
    pub source_map: Option<String>,
}

/// One syntax error, 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Compilation failure.
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("cannot compile {}: {reason}", path.display())]
    Unsupported { path: PathBuf, reason: &'static str },

    #[error("{}", syntax_message(path, errors))]
    Syntax {
        path: PathBuf,
        errors: Vec<SyntaxError>,
    },

    #[error("failed to emit {}: {message}", path.display())]
    Emit { path: PathBuf, message: String },
}

impl CompilerError {
    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unsupported { .. } => "COMPILER_UNSUPPORTED_FILE",
            Self::Syntax { .. } => "COMPILER_PARSE_ERROR",
            Self::Emit { .. } => "COMPILER_EMIT_ERROR",
        }
    }
}

fn syntax_message(path: &Path, errors: &[SyntaxError]) -> String {
    let mut out = format!("syntax error in {}", path.display());
    for e in errors {
        let _ = write!(out, "\n  {}:{}:{}: {}", path.display(), e.line, e.column, e.message);
    }
    out
}

/// Turns one source module into ES module JavaScript.
///
/// `Send + Sync` so one backend serves rayon workers during a build and
/// blocking tasks in the dev server.
pub trait CompilerBackend: Send + Sync {
    fn transpile(&self, spec: &TranspileSpec, source: &str) -> Result<TranspileOutput, CompilerError>;
}
