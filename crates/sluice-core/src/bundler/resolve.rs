//! Import specifier resolution.
//!
//! Resolves import specifiers to absolute file paths.
//!
//! ## Specifier Types
//!
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/abs/path/to/module`
//! - Aliased: any key of the alias table, exactly or as `key/sub/path`
//! - Bare: `htmx.org`, `@scope/pkg`, `pkg/sub/path` (looked up in `node_modules`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Extensions probed for extension-less specifiers, in order.
const EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts", "json"];
/// Index files probed for directory specifiers, in order.
const INDEX_FILES: &[&str] = &["index.ts", "index.tsx", "index.js", "index.jsx", "index.mjs"];
/// `exports` conditions for a browser library build, in priority order.
const CONDITIONS: &[&str] = &["browser", "import", "module", "default", "require"];

/// Result of resolving an import specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveResult {
    /// Successfully resolved to a file path.
    Found(PathBuf),
    /// Built-in Node module (`node:fs`, ...); cannot be bundled for the browser.
    Builtin(String),
}

/// Error during resolution.
#[derive(Debug, Clone)]
pub struct ResolveError {
    pub specifier: String,
    pub from: String,
    pub message: String,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cannot resolve '{}' from '{}': {}",
            self.specifier, self.from, self.message
        )
    }
}

impl std::error::Error for ResolveError {}

/// Import resolver for one source root and alias table.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    alias: BTreeMap<String, String>,
}

impl Resolver {
    /// Create a resolver. Relative alias targets are taken from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, alias: BTreeMap<String, String>) -> Self {
        Self {
            root: root.into(),
            alias,
        }
    }

    /// The source root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an import specifier found in `from`.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<ResolveResult, ResolveError> {
        let err = |message: String| ResolveError {
            specifier: specifier.to_string(),
            from: from.display().to_string(),
            message,
        };

        if let Some(builtin) = specifier.strip_prefix("node:") {
            return Ok(ResolveResult::Builtin(builtin.to_string()));
        }

        if let Some(target) = self.apply_alias(specifier) {
            return self.resolve_aliased(&target, specifier, from);
        }

        if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." {
            let from_dir = from.parent().unwrap_or(Path::new("."));
            return resolve_file_or_directory(&from_dir.join(specifier))
                .map(ResolveResult::Found)
                .ok_or_else(|| err("File not found".to_string()));
        }

        if specifier.starts_with('/') {
            return resolve_file_or_directory(Path::new(specifier))
                .map(ResolveResult::Found)
                .ok_or_else(|| err("File not found".to_string()));
        }

        self.resolve_bare(specifier, from).map(ResolveResult::Found)
    }

    /// Rewrite `specifier` through the alias table, if a key matches.
    ///
    /// A key matches the whole specifier or a `key/` prefix of it; the
    /// longest matching key wins.
    #[must_use]
    pub fn apply_alias(&self, specifier: &str) -> Option<String> {
        self.alias
            .iter()
            .filter(|(key, _)| {
                specifier == key.as_str()
                    || specifier
                        .strip_prefix(key.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(key, _)| key.len())
            .map(|(key, target)| format!("{target}{}", &specifier[key.len()..]))
    }

    fn resolve_aliased(
        &self,
        target: &str,
        specifier: &str,
        from: &Path,
    ) -> Result<ResolveResult, ResolveError> {
        let local = if target.starts_with("./") || target.starts_with("../") {
            Some(self.root.join(target))
        } else if Path::new(target).is_absolute() {
            Some(PathBuf::from(target))
        } else {
            None
        };

        match local {
            Some(path) => resolve_file_or_directory(&path)
                .map(ResolveResult::Found)
                .ok_or_else(|| ResolveError {
                    specifier: specifier.to_string(),
                    from: from.display().to_string(),
                    message: format!("alias target '{target}' not found"),
                }),
            // Aliases to packages are looked up from the source root.
            None => self
                .resolve_bare(target, &self.root.join("_"))
                .map(ResolveResult::Found)
                .map_err(|mut e| {
                    e.specifier = specifier.to_string();
                    e.message = format!("{} (aliased to '{target}')", e.message);
                    e
                }),
        }
    }

    /// Resolve a bare specifier by walking up `node_modules` directories.
    fn resolve_bare(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let (pkg_name, subpath) = parse_bare_specifier(specifier);

        let mut current = from.parent();
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(&pkg_name);

            if pkg_dir.is_dir() {
                let pkg_json = pkg_dir.join("package.json");
                if pkg_json.is_file() {
                    if let Some(entry) = resolve_package_entry(&pkg_dir, &pkg_json, subpath.as_deref())
                    {
                        return Ok(entry);
                    }
                } else {
                    let target = match &subpath {
                        Some(sub) => pkg_dir.join(sub),
                        None => pkg_dir.clone(),
                    };
                    if let Some(found) = resolve_file_or_directory(&target) {
                        return Ok(found);
                    }
                }
            }

            current = dir.parent();
        }

        Err(ResolveError {
            specifier: specifier.to_string(),
            from: from.display().to_string(),
            message: format!("Cannot find package '{pkg_name}' in node_modules"),
        })
    }
}

/// Split a bare specifier into package name and subpath.
fn parse_bare_specifier(specifier: &str) -> (String, Option<String>) {
    let parts: Vec<&str> = if specifier.starts_with('@') {
        specifier.splitn(3, '/').collect()
    } else {
        specifier.splitn(2, '/').collect()
    };

    let name_len = if specifier.starts_with('@') { 2 } else { 1 };
    if parts.len() <= name_len {
        return (specifier.to_string(), None);
    }
    (
        parts[..name_len].join("/"),
        parts.get(name_len).map(|s| (*s).to_string()),
    )
}

/// Resolve the file a package (or package subpath) points at.
fn resolve_package_entry(pkg_dir: &Path, pkg_json: &Path, subpath: Option<&str>) -> Option<PathBuf> {
    let content = std::fs::read_to_string(pkg_json).ok()?;
    let json: serde_json::Value = serde_json::from_str(&content).ok()?;

    let export_key = subpath.map_or_else(|| ".".to_string(), |sub| format!("./{sub}"));
    if let Some(exports) = json.get("exports") {
        if let Some(entry) = resolve_exports(exports, &export_key) {
            if let Some(found) = existing(&pkg_dir.join(entry)) {
                return Some(found);
            }
        }
    }

    if let Some(sub) = subpath {
        return resolve_file_or_directory(&pkg_dir.join(sub));
    }

    let fields = ["module", "browser", "main"];
    for field in fields {
        if let Some(entry) = json.get(field).and_then(|v| v.as_str()) {
            if let Some(found) = resolve_file_or_directory(&pkg_dir.join(entry)) {
                return Some(found);
            }
        }
    }

    existing(&pkg_dir.join("index.js"))
}

/// Resolve an `exports` field for `subpath` (`.` or `./sub`).
fn resolve_exports(exports: &serde_json::Value, subpath: &str) -> Option<String> {
    match exports {
        serde_json::Value::String(s) => (subpath == ".").then(|| s.clone()),
        serde_json::Value::Object(map) => {
            let is_subpath_map = map.keys().any(|k| k.starts_with('.'));
            if !is_subpath_map {
                return (subpath == ".").then(|| resolve_export_value(exports)).flatten();
            }

            if let Some(value) = map.get(subpath) {
                return resolve_export_value(value);
            }

            // Single-wildcard patterns: "./*": "./dist/*.js"
            map.iter().find_map(|(key, value)| {
                let (prefix, suffix) = key.split_once('*')?;
                let matched = subpath.strip_prefix(prefix)?.strip_suffix(suffix)?;
                resolve_export_value(value).map(|target| target.replace('*', matched))
            })
        }
        serde_json::Value::Array(items) => items.iter().find_map(|v| resolve_exports(v, subpath)),
        _ => None,
    }
}

/// Resolve one export target, picking the first matching condition.
fn resolve_export_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => CONDITIONS
            .iter()
            .find_map(|cond| map.get(*cond).and_then(resolve_export_value)),
        serde_json::Value::Array(items) => items.iter().find_map(resolve_export_value),
        _ => None,
    }
}

/// Resolve a path that might be a file, an extension-less file or a directory.
fn resolve_file_or_directory(target: &Path) -> Option<PathBuf> {
    if target.is_file() {
        return existing(target);
    }

    for ext in EXTENSIONS {
        let with_ext = PathBuf::from(format!("{}.{ext}", target.display()));
        if with_ext.is_file() {
            return existing(&with_ext);
        }
    }

    if target.is_dir() {
        let pkg_json = target.join("package.json");
        if pkg_json.is_file() {
            if let Some(entry) = resolve_package_entry(target, &pkg_json, None) {
                return Some(entry);
            }
        }
        for index in INDEX_FILES {
            let index_path = target.join(index);
            if index_path.is_file() {
                return existing(&index_path);
            }
        }
    }

    None
}

fn existing(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        dunce::canonicalize(path).ok()
    } else {
        None
    }
}
