//! Library bundler.
//!
//! Bundles one entry module and everything it imports into library
//! artifacts.
//!
//! ## Usage
//!
//! ```ignore
//! use sluice_core::bundler::{BundleOptions, Bundler, EmitOptions, Resolver};
//!
//! let bundler = Bundler::new(Resolver::new(&root, alias));
//! let result = bundler.bundle(&root.join("client.ts"), &BundleOptions::default())?;
//! let output = result.emit(&EmitOptions { format: LibFormat::Es, .. })?;
//! ```
//!
//! ## Architecture
//!
//! 1. **Resolution** - Resolve import specifiers to file paths
//! 2. **Graph** - Collect the graph breadth-first, one frontier at a time
//! 3. **Transform** - Transpile each frontier in parallel (TS → JS, CSS, JSON)
//! 4. **Link** - Rewrite imports into namespace reads and exports into getters
//! 5. **Emit** - Wrap modules in a registry runtime, once per format

mod emit;
mod graph;
mod link;
mod resolve;
pub(crate) mod scan;
mod sourcemap;

pub use emit::{emit_bundle, export_names, BundleOutput, EmitOptions};
pub use graph::{Module, ModuleGraph, ModuleId, ModuleKind};
pub use resolve::{ResolveError, ResolveResult, Resolver};
pub use scan::{scan_exports, scan_imports, Exports, Import};
pub use sourcemap::{LineMap, SourceMapBuilder};

use crate::build::codes;
use crate::compiler::{CompilerBackend, SwcBackend, TranspileSpec};
use crate::css::{process_css, CssOptions};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Options that affect how modules are loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleOptions {
    /// Minify stylesheets (scripts are minified when linked).
    pub minify: bool,
    /// Keep per-module source maps for the artifact maps.
    pub sourcemap: bool,
}

/// A collected module graph, ready to emit.
#[derive(Debug)]
pub struct BundleResult {
    pub graph: ModuleGraph,
    pub entry: ModuleId,
    /// Emission order: dependencies before dependents.
    pub order: Vec<ModuleId>,
    /// Concatenated stylesheets, if any were imported.
    pub css: Option<String>,
}

impl BundleResult {
    /// Emit one JavaScript artifact.
    pub fn emit(&self, options: &EmitOptions<'_>) -> Result<BundleOutput, BundleError> {
        emit_bundle(&self.graph, &self.order, self.entry, options)
    }

    /// Paths of the bundled modules, in emission order.
    #[must_use]
    pub fn modules(&self) -> Vec<PathBuf> {
        self.order
            .iter()
            .filter_map(|&id| self.graph.get(id).map(|m| m.path.clone()))
            .collect()
    }
}

/// Bundler error.
#[derive(Debug)]
pub struct BundleError {
    pub code: &'static str,
    pub message: String,
    pub path: Option<String>,
}

impl std::fmt::Display for BundleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {} ({})", self.code, self.message, path)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for BundleError {}

impl From<ResolveError> for BundleError {
    fn from(err: ResolveError) -> Self {
        BundleError {
            code: codes::BUILD_RESOLVE_ERROR,
            message: format!("cannot resolve '{}': {}", err.specifier, err.message),
            path: Some(err.from),
        }
    }
}

/// A module loaded from disk with its resolved dependencies.
type Loaded = (Module, Vec<(String, PathBuf)>);

/// The main bundler.
pub struct Bundler {
    resolver: Resolver,
    backend: Box<dyn CompilerBackend>,
}

impl Bundler {
    /// Create a bundler using SWC for transpilation.
    #[must_use]
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            backend: Box::new(SwcBackend::new()),
        }
    }

    /// Replace the compiler backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Box<dyn CompilerBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Collect and transform the module graph of `entry`.
    pub fn bundle(&self, entry: &Path, options: &BundleOptions) -> Result<BundleResult, BundleError> {
        let entry_path = dunce::canonicalize(entry).map_err(|e| BundleError {
            code: codes::BUILD_ENTRY_NOT_FOUND,
            message: format!("cannot find entry module: {e}"),
            path: Some(entry.display().to_string()),
        })?;
        if !entry_path.is_file() {
            return Err(BundleError {
                code: codes::BUILD_ENTRY_NOT_FOUND,
                message: "entry is not a file".to_string(),
                path: Some(entry.display().to_string()),
            });
        }

        let graph = self.build_graph(entry_path, options)?;
        let entry = 0;
        let order = graph.postorder(entry);

        let stylesheets: Vec<&str> = order
            .iter()
            .filter_map(|&id| graph.get(id))
            .filter(|m| m.kind == ModuleKind::Css)
            .map(|m| m.code.as_str())
            .collect();
        let css = (!stylesheets.is_empty())
            .then(|| stylesheets.join(if options.minify { "" } else { "\n" }));

        debug!(modules = graph.len(), css = css.is_some(), "module graph collected");

        Ok(BundleResult {
            graph,
            entry,
            order,
            css,
        })
    }

    /// Build the graph breadth-first. Each frontier is loaded and transpiled
    /// in parallel; IDs are assigned in discovery order.
    fn build_graph(&self, entry: PathBuf, options: &BundleOptions) -> Result<ModuleGraph, BundleError> {
        let mut graph = ModuleGraph::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut links: Vec<(ModuleId, Vec<(String, PathBuf)>)> = Vec::new();

        seen.insert(entry.clone());
        let mut frontier = vec![entry];

        while !frontier.is_empty() {
            let loaded: Vec<Result<Loaded, BundleError>> = frontier
                .par_iter()
                .map(|path| self.load(path, options))
                .collect();

            let mut next = Vec::new();
            for result in loaded {
                let (module, deps) = result?;
                for (_, path) in &deps {
                    if seen.insert(path.clone()) {
                        next.push(path.clone());
                    }
                }
                let id = graph.add(module);
                links.push((id, deps));
            }
            frontier = next;
        }

        for (id, deps) in links {
            for (specifier, path) in deps {
                graph.link(id, &specifier, &path);
            }
        }

        Ok(graph)
    }

    /// Read, transform and scan one module, and resolve its imports.
    fn load(&self, path: &Path, options: &BundleOptions) -> Result<Loaded, BundleError> {
        let path_str = path.display().to_string();
        let kind = ModuleKind::from_path(path).ok_or_else(|| BundleError {
            code: codes::BUILD_UNSUPPORTED_IMPORT,
            message: "unsupported module type".to_string(),
            path: Some(path_str.clone()),
        })?;

        let source = std::fs::read_to_string(path).map_err(|e| BundleError {
            code: codes::BUILD_RESOLVE_ERROR,
            message: format!("failed to read module: {e}"),
            path: Some(path_str.clone()),
        })?;

        let (code, map) = match kind {
            ModuleKind::Script => {
                let spec = TranspileSpec::new(path).with_sourcemap(options.sourcemap);
                let output = self.backend.transpile(&spec, &source).map_err(|e| BundleError {
                    code: codes::BUILD_COMPILE_ERROR,
                    message: e.to_string(),
                    path: Some(path_str.clone()),
                })?;
                let map = output.source_map.as_deref().and_then(LineMap::parse);
                (output.code, map)
            }
            ModuleKind::Css => {
                let css_options = CssOptions {
                    minify: options.minify,
                    filename: Some(path_str.clone()),
                };
                let code = process_css(&source, &css_options).map_err(|e| BundleError {
                    code: codes::BUILD_CSS_ERROR,
                    message: e.to_string(),
                    path: Some(path_str.clone()),
                })?;
                (code, None)
            }
            ModuleKind::Json => {
                let value: serde_json::Value =
                    serde_json::from_str(&source).map_err(|e| BundleError {
                        code: codes::BUILD_COMPILE_ERROR,
                        message: format!("invalid JSON: {e}"),
                        path: Some(path_str.clone()),
                    })?;
                (value.to_string(), None)
            }
        };

        let imports = if kind == ModuleKind::Script {
            scan_imports(&code)
        } else {
            Vec::new()
        };

        let mut deps = Vec::with_capacity(imports.len());
        for import in &imports {
            match self.resolver.resolve(&import.specifier, path)? {
                ResolveResult::Found(dep) => {
                    if ModuleKind::from_path(&dep).is_none() {
                        return Err(BundleError {
                            code: codes::BUILD_UNSUPPORTED_IMPORT,
                            message: format!(
                                "cannot bundle '{}': only scripts, stylesheets and JSON can be imported",
                                import.specifier
                            ),
                            path: Some(path_str),
                        });
                    }
                    deps.push((import.specifier.clone(), dep));
                }
                ResolveResult::Builtin(name) => {
                    return Err(BundleError {
                        code: codes::BUILD_UNSUPPORTED_IMPORT,
                        message: format!("node built-in 'node:{name}' cannot be bundled for the browser"),
                        path: Some(path_str),
                    });
                }
            }
        }

        debug!(path = %path_str, ?kind, imports = deps.len(), "loaded module");

        Ok((
            Module {
                path: path.to_path_buf(),
                kind,
                source,
                code,
                map,
                imports,
                dependencies: Vec::new(),
            },
            deps,
        ))
    }
}
