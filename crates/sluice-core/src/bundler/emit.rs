//! Bundle output emission.
//!
//! Generates one library artifact from the module graph: a small module
//! registry runtime, one `__modules[id]` factory per module, and a format
//! wrapper (ES, UMD, CJS or IIFE) around the entry module's exports.

use super::graph::{ModuleGraph, ModuleId, ModuleKind};
use super::link::{link_module, LinkedModule};
use super::scan;
use super::sourcemap::SourceMapBuilder;
use super::BundleError;
use crate::build::codes;
use crate::config::LibFormat;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;

const RUNTIME: &str = r#"'use strict';
var __modules = {};
var __cache = {};
function __require(id) {
  var cached = __cache[id];
  if (cached) return cached.exports;
  var module = (__cache[id] = { exports: {} });
  __modules[id](module, module.exports, __require);
  return module.exports;
}
function __esm(target) {
  if (!Object.prototype.hasOwnProperty.call(target, '__esModule')) {
    Object.defineProperty(target, '__esModule', { value: true });
  }
}
function __export(target, getters) {
  __esm(target);
  for (var name in getters) {
    Object.defineProperty(target, name, { enumerable: true, get: getters[name] });
  }
}
function __reexport(target, source) {
  __esm(target);
  Object.keys(source).forEach(function (key) {
    if (key === 'default' || Object.prototype.hasOwnProperty.call(target, key)) return;
    Object.defineProperty(target, key, { enumerable: true, get: function () { return source[key]; } });
  });
}
function __default(m) {
  return m && m.__esModule ? m.default : m;
}"#;

const RUNTIME_MIN: &str = "'use strict';var __modules={};var __cache={};function __require(id){var c=__cache[id];if(c)return c.exports;var module=(__cache[id]={exports:{}});__modules[id](module,module.exports,__require);return module.exports;}function __esm(t){if(!Object.prototype.hasOwnProperty.call(t,'__esModule'))Object.defineProperty(t,'__esModule',{value:true});}function __export(t,g){__esm(t);for(var n in g)Object.defineProperty(t,n,{enumerable:true,get:g[n]});}function __reexport(t,s){__esm(t);Object.keys(s).forEach(function(k){if(k==='default'||Object.prototype.hasOwnProperty.call(t,k))return;Object.defineProperty(t,k,{enumerable:true,get:function(){return s[k];}});});}function __default(m){return m&&m.__esModule?m.default:m;}";

/// Emission options for one artifact.
#[derive(Debug, Clone)]
pub struct EmitOptions<'a> {
    pub format: LibFormat,
    /// Global name for UMD and IIFE.
    pub name: &'a str,
    /// Artifact file name, used for the map's `file` and the
    /// `sourceMappingURL` comment.
    pub file: &'a str,
    pub minify: bool,
    pub sourcemap: bool,
    /// Directory the artifact is written to; map sources are relative to it.
    pub out_dir: &'a Path,
}

/// Bundle output.
#[derive(Debug, Clone)]
pub struct BundleOutput {
    /// The bundled code.
    pub code: String,
    /// Source map (if enabled).
    pub map: Option<String>,
}

/// Emit one artifact for `entry` from modules in `order`.
pub fn emit_bundle(
    graph: &ModuleGraph,
    order: &[ModuleId],
    entry: ModuleId,
    options: &EmitOptions<'_>,
) -> Result<BundleOutput, BundleError> {
    let linked: Vec<LinkedModule> = order
        .par_iter()
        .filter_map(|&id| {
            let module = graph.get(id)?;
            link_module(id, module, graph, options.minify, options.sourcemap).transpose()
        })
        .collect::<Result<_, _>>()?;

    let mut writer = Writer::new(options, graph);
    writer.head(entry)?;
    for module in &linked {
        writer.module(module);
    }
    writer.tail(entry);

    writer.finish()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(scan::is_ident_char)
}

fn object_key(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        serde_json::Value::String(name.to_string()).to_string()
    }
}

fn member(name: &str) -> String {
    if is_identifier(name) {
        format!(".{name}")
    } else {
        format!("[{}]", object_key(name))
    }
}

/// Names exported by `id`, following `export * from` chains.
pub fn export_names(graph: &ModuleGraph, id: ModuleId) -> Vec<String> {
    let mut names = Vec::new();
    let mut visited = HashSet::new();
    collect_export_names(graph, id, true, &mut names, &mut visited);
    names
}

fn collect_export_names(
    graph: &ModuleGraph,
    id: ModuleId,
    include_default: bool,
    names: &mut Vec<String>,
    visited: &mut HashSet<ModuleId>,
) {
    if !visited.insert(id) {
        return;
    }
    let Some(module) = graph.get(id) else {
        return;
    };
    if module.kind != ModuleKind::Script {
        return;
    }

    let exports = scan::scan_exports(&module.code);
    for name in exports.names {
        if (include_default || name != "default") && !names.contains(&name) {
            names.push(name);
        }
    }
    for specifier in exports.star_from {
        if let Some(dep) = graph.resolve_specifier(id, &specifier) {
            collect_export_names(graph, dep, false, names, visited);
        }
    }
}

/// Output accumulator with line tracking for the source map.
///
/// Text is written exactly as given: module bodies carry string and
/// template literals whose lines must not be shifted.
struct Writer<'a> {
    options: &'a EmitOptions<'a>,
    graph: &'a ModuleGraph,
    out: String,
    line: u32,
    map: Option<SourceMapBuilder>,
    /// Map source index per module ID.
    sources: Vec<Option<u32>>,
}

impl<'a> Writer<'a> {
    fn new(options: &'a EmitOptions<'a>, graph: &'a ModuleGraph) -> Self {
        Self {
            options,
            graph,
            out: String::new(),
            line: 0,
            map: options.sourcemap.then(SourceMapBuilder::new),
            sources: vec![None; graph.len()],
        }
    }

    /// Push `text` and a line break.
    fn push(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
        let breaks = text.bytes().filter(|&b| b == b'\n').count();
        self.line += 1 + u32::try_from(breaks).unwrap_or(0);
    }

    fn source_index(&mut self, id: ModuleId) -> Option<u32> {
        if let Some(idx) = self.sources.get(id).copied().flatten() {
            return Some(idx);
        }
        let module = self.graph.get(id)?;
        let map = self.map.as_mut()?;
        let path = sluice_util::fs::relative_path(self.options.out_dir, &module.path);
        let idx = map.add_source(&path, &module.source);
        if let Some(slot) = self.sources.get_mut(id) {
            *slot = Some(idx);
        }
        Some(idx)
    }

    fn head(&mut self, entry: ModuleId) -> Result<(), BundleError> {
        let name = self.options.name;
        let minify = self.options.minify;
        match self.options.format {
            LibFormat::Es | LibFormat::Cjs => {}
            LibFormat::Iife => {
                if minify {
                    self.push(&format!("var {name}=(function(){{"));
                } else {
                    self.push(&format!("var {name} = (function () {{"));
                }
            }
            LibFormat::Umd => {
                if minify {
                    self.push(&format!(
                        "(function(g,f){{typeof exports==='object'&&typeof module!=='undefined'?module.exports=f():typeof define==='function'&&define.amd?define(f):(g=typeof globalThis!=='undefined'?globalThis:g||self,g.{name}=f());}})(this,function(){{"
                    ));
                } else {
                    self.push("(function (global, factory) {");
                    self.push("  typeof exports === 'object' && typeof module !== 'undefined' ? module.exports = factory() :");
                    self.push("  typeof define === 'function' && define.amd ? define(factory) :");
                    self.push(&format!(
                        "  (global = typeof globalThis !== 'undefined' ? globalThis : global || self, global.{name} = factory());"
                    ));
                    self.push("})(this, function () {");
                }
            }
        }

        if self.graph.get(entry).is_none() {
            return Err(BundleError {
                code: codes::BUILD_INTERNAL_ERROR,
                message: format!("entry module {entry} not found in graph"),
                path: None,
            });
        }

        self.push(if minify { RUNTIME_MIN } else { RUNTIME });
        Ok(())
    }

    /// Write one `__modules[id]` factory around a linked body.
    fn module(&mut self, module: &LinkedModule) {
        let graph = self.graph;
        let Some(m) = graph.get(module.id) else {
            return;
        };
        let minify = self.options.minify;

        // Where body line 0, column 0 lands in the output.
        let (text, first_line, first_column) = if minify {
            let header = format!("__modules[{}]=function(module,exports,require){{", module.id);
            let column = u32::try_from(header.len()).unwrap_or(0);
            (format!("{header}{}}};", module.body), self.line, column)
        } else {
            self.push("");
            self.push(&format!(
                "// Module {}: {}",
                module.id,
                sluice_util::fs::relative_path(self.options.out_dir, &m.path)
            ));
            let header = format!("__modules[{}] = function (module, exports, require) {{", module.id);
            let text = if module.body.is_empty() {
                format!("{header}\n}};")
            } else {
                format!("{header}\n{}\n}};", module.body)
            };
            (text, self.line + 1, 0)
        };

        let source = self.source_index(module.id);
        if let (Some(map), Some(source), Some(module_map)) = (self.map.as_mut(), source, m.map.as_ref()) {
            for mapping in &module.mappings {
                let Some(orig) = module_map.lookup(mapping.line as usize, mapping.column) else {
                    continue;
                };
                let column = if mapping.generated_line == 0 {
                    mapping.generated_column + first_column
                } else {
                    mapping.generated_column
                };
                map.add_mapping(
                    first_line + mapping.generated_line,
                    column,
                    source,
                    orig.source_line,
                    orig.source_column,
                );
            }
        }

        self.push(&text);
    }

    fn tail(&mut self, entry: ModuleId) {
        let minify = self.options.minify;
        let sp = if minify { "" } else { " " };

        match self.options.format {
            LibFormat::Es => {
                let names = export_names(self.graph, entry);
                if names.is_empty() {
                    self.push(&format!("__require({entry});"));
                } else {
                    let mut text = format!("var __entry{sp}={sp}__require({entry});");
                    let mut specs = Vec::new();
                    for (i, name) in names.iter().enumerate() {
                        if !minify {
                            text.push('\n');
                        }
                        text.push_str(&format!("var __x{i}{sp}={sp}__entry{};", member(name)));
                        specs.push(format!("__x{i} as {}", export_name(name)));
                    }
                    if minify {
                        text.push_str(&format!("export{{{}}};", specs.join(",")));
                    } else {
                        text.push_str(&format!("\nexport {{ {} }};", specs.join(", ")));
                    }
                    self.push(&text);
                }
            }
            LibFormat::Cjs => {
                self.push(&format!("module.exports{sp}={sp}__require({entry});"));
            }
            LibFormat::Iife => {
                self.push(&format!("return __require({entry});"));
                self.push("})();");
            }
            LibFormat::Umd => {
                self.push(&format!("return __require({entry});"));
                self.push("});");
            }
        }
    }

    fn finish(mut self) -> Result<BundleOutput, BundleError> {
        let map = match self.map.take() {
            Some(builder) => {
                let json = builder.generate(self.options.file).map_err(|e| BundleError {
                    code: codes::BUILD_OUTPUT_ERROR,
                    message: format!("failed to serialize source map: {e}"),
                    path: None,
                })?;
                self.push(&format!("//# sourceMappingURL={}.map", self.options.file));
                Some(json)
            }
            None => None,
        };
        Ok(BundleOutput {
            code: self.out,
            map,
        })
    }
}

/// Exported name as written in an `export { x as <name> }` list.
fn export_name(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        object_key(name)
    }
}
