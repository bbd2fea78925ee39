//! Per-request module transformation for unbundled dev serving.
//!
//! Handles: URL → file → transpile → import rewrite. Nothing is cached; every
//! request reads the live source tree.

use crate::bundler::{ResolveResult, Resolver};
use crate::compiler::{CompilerBackend, SwcBackend, TranspileSpec};
use crate::config::ResolvedConfig;
use crate::css::{create_css_module, process_css, CssOptions};
use crate::dev::rewrite::{ImportRewriter, FS_PREFIX, MODULES_PREFIX, STYLE_PREFIX};
use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const JAVASCRIPT: &str = "application/javascript; charset=utf-8";

/// A response body ready to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

impl Served {
    fn javascript(code: String) -> Self {
        Self {
            body: code.into_bytes(),
            content_type: JAVASCRIPT,
        }
    }
}

/// Why a local request could not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    /// No such file or module.
    NotFound,
    /// The path escapes the served directories.
    Forbidden,
    /// Reading, transpiling or processing failed.
    Failed,
}

/// Transform error.
#[derive(Debug, Clone)]
pub struct ModuleTransformError {
    pub kind: TransformErrorKind,
    pub message: String,
    pub file: Option<String>,
}

impl ModuleTransformError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: TransformErrorKind::NotFound,
            message: message.into(),
            file: None,
        }
    }

    fn forbidden(url: &str) -> Self {
        Self {
            kind: TransformErrorKind::Forbidden,
            message: format!("path outside the served directories: {url}"),
            file: None,
        }
    }

    fn failed(message: impl Into<String>, file: &Path) -> Self {
        Self {
            kind: TransformErrorKind::Failed,
            message: message.into(),
            file: Some(file.display().to_string()),
        }
    }
}

impl std::fmt::Display for ModuleTransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}: {}", file, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ModuleTransformError {}

/// Serves the live source tree, transforming modules on demand.
#[derive(Debug)]
pub struct ModuleTransformer {
    /// Canonical source root.
    root: PathBuf,
    /// Canonical public directory, if it exists.
    public_dir: Option<PathBuf>,
    /// Canonical `node_modules` directories of the root and its ancestors.
    package_dirs: Vec<PathBuf>,
    /// Entry URL for the generated index page.
    entry_url: String,
    resolver: Resolver,
    rewriter: ImportRewriter,
    backend: SwcBackend,
}

impl ModuleTransformer {
    /// Create a transformer for a resolved configuration.
    ///
    /// The source root must exist.
    pub fn new(config: &ResolvedConfig) -> std::io::Result<Self> {
        let root = dunce::canonicalize(&config.build.root)?;
        let public_dir = config
            .server
            .public_dir
            .as_ref()
            .and_then(|dir| dunce::canonicalize(dir).ok())
            .filter(|dir| dir.is_dir());
        let package_dirs = root
            .ancestors()
            .filter_map(|dir| dunce::canonicalize(dir.join("node_modules")).ok())
            .collect();

        let resolver = Resolver::new(&root, config.build.alias.clone());
        let rewriter = ImportRewriter::new(resolver.clone());
        let entry = dunce::canonicalize(config.build.entry_path())
            .unwrap_or_else(|_| root.join(&config.build.entry));
        let entry_url = rewriter.url_for(&entry);

        Ok(Self {
            root,
            public_dir,
            package_dirs,
            entry_url,
            resolver,
            rewriter,
            backend: SwcBackend::new(),
        })
    }

    /// The canonical source root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve a request path (without query) and its raw query string.
    pub fn serve(&self, url_path: &str, query: Option<&str>) -> Result<Served, ModuleTransformError> {
        let decoded = percent_decode_str(url_path)
            .decode_utf8()
            .map_err(|_| ModuleTransformError::not_found(format!("invalid path: {url_path}")))?;
        if decoded.contains('\0') {
            return Err(ModuleTransformError::forbidden(url_path));
        }
        let url = decoded.as_ref();

        if let Some(specifier) = url.strip_prefix(MODULES_PREFIX) {
            return self.bare_module(specifier);
        }

        if let Some(rest) = url.strip_prefix(STYLE_PREFIX) {
            let path = self.file_for_url(&format!("/{rest}"))?;
            return self.style_module(&path);
        }

        if let Some(served) = self.public_file(url)? {
            return Ok(served);
        }

        if url == "/" {
            return self.index(&self.root);
        }

        let path = match self.file_for_url(url) {
            Ok(path) => path,
            // Extension-less routes fall back to the index page.
            Err(e) if e.kind == TransformErrorKind::NotFound && extension(url).is_none() => {
                return self.index(&self.root);
            }
            Err(e) => return Err(e),
        };

        if path.is_dir() {
            return self.index(&path);
        }

        let is_import = query.is_some_and(|q| q.split('&').any(|p| p == "import"));
        match extension(&path.to_string_lossy()).as_deref() {
            Some("ts" | "tsx" | "mts" | "cts" | "js" | "mjs" | "cjs" | "jsx") => self.script_module(&path),
            Some("json") if is_import => self.json_module(&path),
            _ => read_static(&path),
        }
    }

    /// Map a URL path to a file, refusing anything outside the root (or,
    /// for `/@fs/` URLs, outside the `node_modules` directories that
    /// package resolution can reach from the root).
    fn file_for_url(&self, url: &str) -> Result<PathBuf, ModuleTransformError> {
        if let Some(rest) = url.strip_prefix(FS_PREFIX) {
            let requested = sluice_util::fs::normalize(&Path::new("/").join(rest));
            let path = dunce::canonicalize(&requested)
                .map_err(|_| ModuleTransformError::not_found(format!("file not found: {url}")))?;
            let in_packages = self.package_dirs.iter().any(|dir| path.starts_with(dir))
                || (path.starts_with(&self.root)
                    && path
                        .components()
                        .any(|c| c == Component::Normal("node_modules".as_ref())));
            if !in_packages || !path.is_file() {
                return Err(ModuleTransformError::forbidden(url));
            }
            return Ok(path);
        }

        let requested = sluice_util::fs::normalize(&self.root.join(url.trim_start_matches('/')));
        if !requested.starts_with(&self.root) {
            return Err(ModuleTransformError::forbidden(url));
        }

        let path = dunce::canonicalize(&requested)
            .map_err(|_| ModuleTransformError::not_found(format!("file not found: {url}")))?;
        // Symlinks may still point elsewhere.
        if !path.starts_with(&self.root) {
            return Err(ModuleTransformError::forbidden(url));
        }
        Ok(path)
    }

    fn public_file(&self, url: &str) -> Result<Option<Served>, ModuleTransformError> {
        let Some(public_dir) = &self.public_dir else {
            return Ok(None);
        };

        let requested = sluice_util::fs::normalize(&public_dir.join(url.trim_start_matches('/')));
        if !requested.starts_with(public_dir) || !requested.is_file() {
            return Ok(None);
        }
        read_static(&requested).map(Some)
    }

    /// `index.html` from `dir`, or a generated page that loads the entry.
    fn index(&self, dir: &Path) -> Result<Served, ModuleTransformError> {
        let index = dir.join("index.html");
        if index.is_file() {
            return read_static(&index);
        }
        if dir != self.root {
            return Err(ModuleTransformError::not_found(format!(
                "no index.html in {}",
                dir.display()
            )));
        }

        Ok(Served {
            body: generate_index_html(&self.entry_url).into_bytes(),
            content_type: "text/html; charset=utf-8",
        })
    }

    /// Resolve a bare or aliased specifier and serve the target.
    fn bare_module(&self, specifier: &str) -> Result<Served, ModuleTransformError> {
        match self.resolver.resolve(specifier, &self.root.join("_")) {
            Ok(ResolveResult::Found(path)) => {
                let path = dunce::canonicalize(&path).unwrap_or(path);
                debug!(specifier, path = %path.display(), "resolved module");
                match extension(&path.to_string_lossy()).as_deref() {
                    Some("css") => self.style_module(&path),
                    Some("json") => self.json_module(&path),
                    _ => self.script_module(&path),
                }
            }
            Ok(ResolveResult::Builtin(name)) => Err(ModuleTransformError::not_found(format!(
                "Node built-in '{name}' is not available in the browser"
            ))),
            Err(e) => Err(ModuleTransformError::not_found(e.to_string())),
        }
    }

    /// Transpile a script and rewrite its imports.
    pub fn script_module(&self, path: &Path) -> Result<Served, ModuleTransformError> {
        let source = read_text(path)?;
        let output = self
            .backend
            .transpile(&TranspileSpec::new(path), &source)
            .map_err(|e| ModuleTransformError::failed(e.to_string(), path))?;

        Ok(Served::javascript(self.rewriter.rewrite(&output.code, path)))
    }

    /// Wrap a stylesheet in a module that injects it.
    pub fn style_module(&self, path: &Path) -> Result<Served, ModuleTransformError> {
        let source = read_text(path)?;
        let css = process_css(
            &source,
            &CssOptions {
                minify: false,
                filename: Some(path.display().to_string()),
            },
        )
        .map_err(|e| ModuleTransformError::failed(e.to_string(), path))?;

        let id = self.rewriter.url_for(path);
        Ok(Served::javascript(create_css_module(&css, &id)))
    }

    /// Serve JSON as a module whose default export is the document.
    pub fn json_module(&self, path: &Path) -> Result<Served, ModuleTransformError> {
        let source = read_text(path)?;
        let value: serde_json::Value = serde_json::from_str(&source)
            .map_err(|e| ModuleTransformError::failed(format!("invalid JSON: {e}"), path))?;
        Ok(Served::javascript(format!("export default {value};\n")))
    }
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty()).then(|| ext.to_ascii_lowercase())
}

fn read_text(path: &Path) -> Result<String, ModuleTransformError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ModuleTransformError::not_found(format!("file not found: {}", path.display()))
        }
        _ => ModuleTransformError::failed(e.to_string(), path),
    })
}

fn read_static(path: &Path) -> Result<Served, ModuleTransformError> {
    let body = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ModuleTransformError::not_found(format!("file not found: {}", path.display()))
        }
        _ => ModuleTransformError::failed(e.to_string(), path),
    })?;
    Ok(Served {
        body,
        content_type: content_type(path),
    })
}

/// Content type for a static file.
#[must_use]
pub fn content_type(path: &Path) -> &'static str {
    match extension(&path.to_string_lossy()).as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs" | "cjs") => JAVASCRIPT,
        Some("json" | "map") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Generate the index page for projects without an `index.html`.
fn generate_index_html(entry_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>sluice dev</title>
</head>
<body>
  <div id="app"></div>
  <script type="module">
    import * as client from "{entry_url}";
    if (typeof client.init === "function") client.init(document.getElementById("app"));
  </script>
</body>
</html>
"#
    )
}
