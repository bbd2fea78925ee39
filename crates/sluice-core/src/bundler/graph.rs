//! The entry's module graph.
//!
//! Modules are stored in discovery order and addressed by index. Each edge
//! remembers the specifier text that produced it, so the emitter can rewrite
//! `require("./x")` calls to module ids without resolving again.

use super::scan::Import;
use super::sourcemap::LineMap;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Index of a module; the entry is always `0`.
pub type ModuleId = usize;

/// What a module contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// TypeScript or JavaScript.
    Script,
    /// A stylesheet, extracted into the CSS artifact.
    Css,
    /// A JSON document, bundled as its value.
    Json,
}

impl ModuleKind {
    /// Classify a resolved file by extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "ts" | "tsx" | "mts" | "cts" | "js" | "jsx" | "mjs" | "cjs" => Some(Self::Script),
            "css" => Some(Self::Css),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// One file of the bundle.
#[derive(Debug, Clone)]
pub struct Module {
    /// Canonical absolute path.
    pub path: PathBuf,
    pub kind: ModuleKind,
    /// Original source text.
    pub source: String,
    /// Transpiled JavaScript, processed CSS or compact JSON.
    pub code: String,
    /// Map from `code` back to `source` (scripts with sourcemaps on).
    pub map: Option<LineMap>,
    /// Imports found in `code`.
    pub imports: Vec<Import>,
    /// Linked modules, in import order.
    pub dependencies: Vec<ModuleId>,
}

/// Modules plus the specifier edges between them.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    by_path: HashMap<PathBuf, ModuleId>,
    /// `(importer, specifier)` to target.
    edges: HashMap<(ModuleId, String), ModuleId>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module and return its id.
    pub fn add(&mut self, module: Module) -> ModuleId {
        let id = self.modules.len();
        self.by_path.insert(module.path.clone(), id);
        self.modules.push(module);
        id
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Record that `specifier` in module `from` resolved to `path`.
    ///
    /// Returns `false`, linking nothing, when `path` has not been added.
    pub fn link(&mut self, from: ModuleId, specifier: &str, path: &Path) -> bool {
        let Some(&target) = self.by_path.get(path) else {
            return false;
        };
        self.edges.insert((from, specifier.to_string()), target);
        if let Some(module) = self.modules.get_mut(from) {
            if !module.dependencies.contains(&target) {
                module.dependencies.push(target);
            }
        }
        true
    }

    /// Target of a specifier linked from `from`.
    #[must_use]
    pub fn resolve_specifier(&self, from: ModuleId, specifier: &str) -> Option<ModuleId> {
        self.edges.get(&(from, specifier.to_string())).copied()
    }

    /// Modules reachable from `entry`, dependencies before dependents.
    ///
    /// Depth-first post-order in import order, so stylesheets concatenate in
    /// the order a browser would apply them. Cycles are cut at the first
    /// revisit.
    #[must_use]
    pub fn postorder(&self, entry: ModuleId) -> Vec<ModuleId> {
        let mut order = Vec::with_capacity(self.modules.len());
        let mut visited = HashSet::new();
        // (module, next dependency index)
        let mut stack: Vec<(ModuleId, usize)> = Vec::new();

        if entry < self.modules.len() {
            visited.insert(entry);
            stack.push((entry, 0));
        }

        while let Some((id, next)) = stack.pop() {
            let deps = &self.modules[id].dependencies;
            if let Some(&dep) = deps.get(next) {
                stack.push((id, next + 1));
                if visited.insert(dep) {
                    stack.push((dep, 0));
                }
            } else {
                order.push(id);
            }
        }

        order
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(path: &str) -> Module {
        Module {
            path: PathBuf::from(path),
            kind: ModuleKind::from_path(Path::new(path)).unwrap(),
            source: String::new(),
            code: String::new(),
            map: None,
            imports: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn test_empty_graph() {
        let graph = ModuleGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
        assert!(graph.postorder(0).is_empty());
    }

    #[test]
    fn test_module_kind() {
        assert_eq!(ModuleKind::from_path(Path::new("a.ts")), Some(ModuleKind::Script));
        assert_eq!(ModuleKind::from_path(Path::new("a.CSS")), Some(ModuleKind::Css));
        assert_eq!(ModuleKind::from_path(Path::new("a.json")), Some(ModuleKind::Json));
        assert_eq!(ModuleKind::from_path(Path::new("a.png")), None);
        assert_eq!(ModuleKind::from_path(Path::new("LICENSE")), None);
    }

    #[test]
    fn test_link_and_resolve() {
        let mut graph = ModuleGraph::new();
        let a = graph.add(module("/src/a.ts"));
        let b = graph.add(module("/src/b.ts"));

        assert!(graph.link(a, "./b", Path::new("/src/b.ts")));
        assert!(graph.link(a, "./b.ts", Path::new("/src/b.ts")));
        assert!(!graph.link(a, "./c", Path::new("/src/c.ts")));

        assert_eq!(graph.resolve_specifier(a, "./b"), Some(b));
        assert_eq!(graph.resolve_specifier(b, "./b"), None);
        assert_eq!(graph.get(a).unwrap().dependencies, vec![b]);
    }

    #[test]
    fn test_postorder() {
        // client -> (htmx, style.css, util); util -> style.css
        let mut graph = ModuleGraph::new();
        let client = graph.add(module("/src/client.ts"));
        let htmx = graph.add(module("/node_modules/htmx.org/htmx.js"));
        let css = graph.add(module("/src/style.css"));
        let util = graph.add(module("/src/util.ts"));
        graph.link(client, "htmx.org", Path::new("/node_modules/htmx.org/htmx.js"));
        graph.link(client, "./style.css", Path::new("/src/style.css"));
        graph.link(client, "./util", Path::new("/src/util.ts"));
        graph.link(util, "./style.css", Path::new("/src/style.css"));

        assert_eq!(graph.postorder(client), vec![htmx, css, util, client]);
    }

    #[test]
    fn test_postorder_cycle() {
        let mut graph = ModuleGraph::new();
        let a = graph.add(module("/a.ts"));
        let b = graph.add(module("/b.ts"));
        graph.link(a, "./b", Path::new("/b.ts"));
        graph.link(b, "./a", Path::new("/a.ts"));

        assert_eq!(graph.postorder(a), vec![b, a]);
    }
}
