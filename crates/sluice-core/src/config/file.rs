//! Config file discovery and parsing.
//!
//! JavaScript and TypeScript config modules are parsed with SWC and the object
//! their default export produces is read statically:
//!
//! ```js
//! export default defineConfig(({ mode }) => {
//!   return {
//!     root: './internal/ts-client',
//!     build: { lib: { entry: 'client.ts', name: 'client' } },
//!     server: { port: 8081, proxy: { '/api': 'http://localhost:8080' } },
//!   };
//! });
//! ```
//!
//! Plain objects, `defineConfig({...})` and function forms that return an
//! object literal are accepted. Values that are not literals (identifiers,
//! calls, interpolated templates) are read as `null`, which leaves the field
//! at its default: anything mode-dependent is decided by the resolver, not by
//! user code.

use super::{ConfigError, UserConfig};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use swc_common::{sync::Lrc, FileName, SourceMap, Spanned};
use swc_ecma_ast::{
    BlockStmt, BlockStmtOrExpr, Callee, DefaultDecl, EsVersion, Expr, ExprOrSpread, Lit, Module,
    ModuleDecl, ModuleItem, ObjectLit, Prop, PropName, PropOrSpread, Stmt, UnaryOp,
};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};
use tracing::{debug, warn};

/// Config file names in priority order.
pub const CONFIG_FILES: &[&str] = &[
    "sluice.config.js",
    "sluice.config.mjs",
    "sluice.config.ts",
    "sluice.config.json",
    "vite.config.js",
    "vite.config.mjs",
    "vite.config.ts",
];

/// Top-level keys the resolver understands.
const KNOWN_KEYS: &[&str] = &["root", "publicDir", "build", "resolve", "server"];
const KNOWN_BUILD_KEYS: &[&str] = &["lib", "outDir", "emptyOutDir", "minify", "sourcemap"];
const KNOWN_SERVER_KEYS: &[&str] = &["host", "port", "strictPort", "open", "cors", "proxy"];

/// Find a config file in the given project directory.
#[must_use]
pub fn find_config_file(project_dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| project_dir.join(name))
        .find(|path| path.is_file())
}

/// Load configuration from a config file in the given project directory.
///
/// If `explicit` is `Some`, that file is loaded (relative paths are taken
/// from `project_dir`) and must exist. Otherwise the directory is searched
/// for [`CONFIG_FILES`]; no file at all is `Ok(None)`.
pub fn load_config(
    project_dir: &Path,
    explicit: Option<&Path>,
) -> Result<Option<(PathBuf, UserConfig)>, ConfigError> {
    let path = match explicit {
        Some(p) => {
            let abs = if p.is_absolute() {
                p.to_path_buf()
            } else {
                project_dir.join(p)
            };
            if !abs.is_file() {
                return Err(ConfigError::NotFound { path: abs });
            }
            abs
        }
        None => match find_config_file(project_dir) {
            Some(p) => p,
            None => {
                debug!(dir = %project_dir.display(), "no config file found, using defaults");
                return Ok(None);
            }
        },
    };

    let source = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;

    let config = parse_config_source(&source, &path)?;
    debug!(path = %path.display(), "loaded config file");
    Ok(Some((path, config)))
}

/// Parse config file contents; `.json` files are strict JSON.
fn parse_config_source(source: &str, path: &Path) -> Result<UserConfig, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let value = match extension(path).as_str() {
        "json" => serde_json::from_str::<Value>(source).map_err(|e| parse_error(e.to_string()))?,
        ext => {
            let module = parse_module(source, path, ext == "ts").map_err(parse_error)?;
            let object = default_export_object(&module).ok_or_else(|| ConfigError::Unsupported {
                path: path.to_path_buf(),
                message: "default export is not an object literal or a function returning one"
                    .to_string(),
            })?;
            object_value(object)
        }
    };

    if !value.is_object() {
        return Err(parse_error("config must be an object".to_string()));
    }

    report_ignored_keys(&value, path);

    serde_json::from_value(value).map_err(|e| parse_error(e.to_string()))
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Log keys that are present but have no effect.
fn report_ignored_keys(value: &Value, path: &Path) {
    let file = path.display().to_string();

    let unknown = |section: &str, obj: &Map<String, Value>, known: &[&str]| {
        for key in obj.keys().filter(|k| !known.contains(&k.as_str())) {
            debug!(file = %file, section, key = %key, "ignoring unknown config key");
        }
    };

    if let Some(obj) = value.as_object() {
        unknown("", obj, KNOWN_KEYS);
    }

    if let Some(build) = value.get("build").and_then(Value::as_object) {
        unknown("build", build, KNOWN_BUILD_KEYS);
        for key in ["minify", "sourcemap"] {
            if build.contains_key(key) {
                warn!(
                    file = %file,
                    key = %format!("build.{key}"),
                    "ignoring config key; minify and sourcemap follow the build mode"
                );
            }
        }
    }

    if let Some(server) = value.get("server").and_then(Value::as_object) {
        unknown("server", server, KNOWN_SERVER_KEYS);
    }
}

/// Parse a config module; errors are rendered as `line:col: message`.
fn parse_module(source: &str, path: &Path, typescript: bool) -> Result<Module, String> {
    let cm: Lrc<SourceMap> = Lrc::default();
    let name = path.display().to_string();
    let fm = cm.new_source_file(Lrc::new(FileName::Custom(name)), source.to_string());

    let syntax = if typescript {
        Syntax::Typescript(TsSyntax::default())
    } else {
        Syntax::Es(EsSyntax::default())
    };
    let lexer = Lexer::new(syntax, EsVersion::Es2022, StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);

    let render = |e: &swc_ecma_parser::error::Error| {
        let loc = cm.lookup_char_pos(e.span().lo);
        format!("{}:{}: {}", loc.line, loc.col.0 + 1, e.kind().msg())
    };

    let module = parser.parse_module().map_err(|e| render(&e))?;
    match parser.take_errors().first() {
        Some(e) => Err(render(e)),
        None => Ok(module),
    }
}

/// The object literal the module's default export evaluates to.
fn default_export_object(module: &Module) -> Option<&ObjectLit> {
    module.body.iter().find_map(|item| match item {
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(export)) => {
            returned_object(&export.expr)
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => match &export.decl {
            DefaultDecl::Fn(f) => f.function.body.as_ref().and_then(block_return),
            _ => None,
        },
        _ => None,
    })
}

/// Follow `defineConfig(...)`, parentheses and function bodies down to an
/// object literal.
fn returned_object(expr: &Expr) -> Option<&ObjectLit> {
    match expr {
        Expr::Object(object) => Some(object),
        Expr::Paren(e) => returned_object(&e.expr),
        Expr::TsAs(e) => returned_object(&e.expr),
        Expr::TsSatisfies(e) => returned_object(&e.expr),
        Expr::Call(call) => {
            let Callee::Expr(callee) = &call.callee else {
                return None;
            };
            if !matches!(&**callee, Expr::Ident(id) if &*id.sym == "defineConfig") {
                return None;
            }
            match call.args.first() {
                Some(ExprOrSpread { spread: None, expr }) => returned_object(expr),
                _ => None,
            }
        }
        Expr::Arrow(arrow) => match &*arrow.body {
            BlockStmtOrExpr::Expr(e) => returned_object(e),
            BlockStmtOrExpr::BlockStmt(block) => block_return(block),
        },
        Expr::Fn(f) => f.function.body.as_ref().and_then(block_return),
        _ => None,
    }
}

/// Last top-level `return` of a function body.
fn block_return(block: &BlockStmt) -> Option<&ObjectLit> {
    block.stmts.iter().rev().find_map(|stmt| match stmt {
        Stmt::Return(ret) => ret.arg.as_deref().and_then(returned_object),
        _ => None,
    })
}

fn object_value(object: &ObjectLit) -> Value {
    let mut map = Map::new();
    for prop in &object.props {
        // `...spread` has no static value.
        let PropOrSpread::Prop(prop) = prop else {
            continue;
        };
        match &**prop {
            Prop::KeyValue(kv) => {
                if let Some(key) = prop_key(&kv.key) {
                    map.insert(key, static_value(&kv.value));
                }
            }
            Prop::Shorthand(ident) => {
                map.insert(ident.sym.to_string(), Value::Null);
            }
            _ => {}
        }
    }
    Value::Object(map)
}

fn prop_key(key: &PropName) -> Option<String> {
    match key {
        PropName::Ident(id) => Some(id.sym.to_string()),
        PropName::Str(s) => Some(s.value.to_string()),
        PropName::Num(n) => Some(n.value.to_string()),
        _ => None,
    }
}

/// JSON value of a literal expression; anything computed is `null`.
fn static_value(expr: &Expr) -> Value {
    match expr {
        Expr::Object(object) => object_value(object),
        Expr::Array(array) => Value::Array(
            array
                .elems
                .iter()
                .map(|elem| match elem {
                    Some(ExprOrSpread { spread: None, expr }) => static_value(expr),
                    _ => Value::Null,
                })
                .collect(),
        ),
        Expr::Lit(Lit::Str(s)) => Value::String(s.value.to_string()),
        Expr::Lit(Lit::Bool(b)) => Value::Bool(b.value),
        Expr::Lit(Lit::Num(n)) => number(n.value),
        Expr::Tpl(tpl) if tpl.exprs.is_empty() => tpl
            .quasis
            .first()
            .and_then(|q| q.cooked.as_ref())
            .map_or(Value::Null, |s| Value::String(s.to_string())),
        Expr::Unary(unary) if unary.op == UnaryOp::Minus => match &*unary.arg {
            Expr::Lit(Lit::Num(n)) => number(-n.value),
            _ => Value::Null,
        },
        Expr::Paren(e) => static_value(&e.expr),
        Expr::TsAs(e) => static_value(&e.expr),
        Expr::TsConstAssertion(e) => static_value(&e.expr),
        Expr::TsSatisfies(e) => static_value(&e.expr),
        _ => Value::Null,
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LibFormat, PublicDirValue};

    fn parse(source: &str) -> Result<UserConfig, ConfigError> {
        parse_config_source(source, Path::new("sluice.config.js"))
    }

    #[test]
    fn test_find_config_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_config_file(dir.path()).is_none());

        std::fs::write(dir.path().join("vite.config.js"), "export default {}").unwrap();
        assert_eq!(
            find_config_file(dir.path()).unwrap(),
            dir.path().join("vite.config.js")
        );

        // sluice.config.json takes priority over vite.config.js
        std::fs::write(dir.path().join("sluice.config.json"), "{}").unwrap();
        assert_eq!(
            find_config_file(dir.path()).unwrap(),
            dir.path().join("sluice.config.json")
        );

        std::fs::write(dir.path().join("sluice.config.js"), "export default {}").unwrap();
        assert_eq!(
            find_config_file(dir.path()).unwrap(),
            dir.path().join("sluice.config.js")
        );
    }

    #[test]
    fn test_parse_simple_config() {
        let source = r#"
            export default {
                root: './web',
                build: {
                    lib: { entry: 'main.ts', name: 'app', fileName: 'bundle', formats: ['es', 'iife'] },
                    outDir: 'dist',
                    emptyOutDir: false,
                },
                resolve: {
                    alias: {
                        '@': './src',
                        "~": "./src",
                    },
                },
                server: {
                    port: 4000,
                    host: 'localhost',
                    open: true,
                },
            };
        "#;

        let config = parse(source).unwrap();
        assert_eq!(config.root.as_deref(), Some("./web"));
        assert_eq!(config.build.lib.entry.as_deref(), Some("main.ts"));
        assert_eq!(config.build.lib.name.as_deref(), Some("app"));
        assert_eq!(config.build.lib.file_name.as_deref(), Some("bundle"));
        assert_eq!(
            config.build.lib.formats,
            Some(vec![LibFormat::Es, LibFormat::Iife])
        );
        assert_eq!(config.build.out_dir.as_deref(), Some("dist"));
        assert_eq!(config.build.empty_out_dir, Some(false));
        let alias = config.resolve.alias.unwrap();
        assert_eq!(alias.get("@").map(String::as_str), Some("./src"));
        assert_eq!(alias.get("~").map(String::as_str), Some("./src"));
        assert_eq!(config.server.port, Some(4000));
        assert_eq!(config.server.open, Some(true));
    }

    #[test]
    fn test_parse_function_form_config() {
        let source = r#"
            import { defineConfig } from 'vite';

            export default defineConfig(({ mode }) => {
              const isProduction = mode === 'production';

              return {
                root: './internal/ts-client',
                build: {
                  lib: {
                    entry: 'client.ts',
                    name: 'client',
                    fileName: 'client'
                  },
                  outDir: '../static/build',     // Output directory relative to the root
                  emptyOutDir: true,
                  minify: isProduction,
                  sourcemap: isProduction,
                },
                resolve: {
                  alias: {
                      htmx: 'htmx.org',
                  },
                },
                server: {
                  port: 8081,
                  strictPort: true,
                  open: false,
                  proxy: {
                    '/api': 'http://localhost:8080',
                  },
                },
              }
            });
        "#;

        let config = parse(source).unwrap();
        assert_eq!(config.root.as_deref(), Some("./internal/ts-client"));
        assert_eq!(config.build.out_dir.as_deref(), Some("../static/build"));
        assert_eq!(config.server.port, Some(8081));
        assert_eq!(config.server.strict_port, Some(true));
        let proxy = config.server.proxy.unwrap();
        assert_eq!(proxy.0.len(), 1);
        assert_eq!(proxy.0[0].0, "/api");
        assert_eq!(proxy.0[0].1.target(), "http://localhost:8080");
    }

    #[test]
    fn test_parse_arrow_returning_object() {
        let source = "export default defineConfig(() => ({ server: { port: 9000 } }));";
        let config = parse(source).unwrap();
        assert_eq!(config.server.port, Some(9000));
    }

    #[test]
    fn test_parse_config_with_comments() {
        let source = r#"
            // This is a config file
            /* Multi-line
               comment */
            export default {
                server: {
                    port: 3000, // inline comment
                },
            };
        "#;

        let config = parse(source).unwrap();
        assert_eq!(config.server.port, Some(3000));
    }

    #[test]
    fn test_expressions_are_unset() {
        let source = r#"
            export default {
                root: process.env.ROOT || 'src',
                server: { port: Number(process.env.PORT), host: `${h}` },
                publicDir: false,
            };
        "#;
        let config = parse(source).unwrap();
        assert_eq!(config.root, None);
        assert_eq!(config.server.port, None);
        assert_eq!(config.server.host, None);
        assert_eq!(config.public_dir, Some(PublicDirValue::Enabled(false)));
    }

    #[test]
    fn test_parse_empty_config() {
        let config = parse("export default {};").unwrap();
        assert_eq!(config, UserConfig::default());
    }

    #[test]
    fn test_no_default_export() {
        let err = parse("const config = {};").unwrap_err();
        assert_eq!(err.code(), "CONFIG_UNSUPPORTED");
    }

    #[test]
    fn test_identifier_export_is_unsupported() {
        let err = parse("const config = {};\nexport default config;").unwrap_err();
        assert_eq!(err.code(), "CONFIG_UNSUPPORTED");
    }

    #[test]
    fn test_invalid_field_type_is_parse_error() {
        let err = parse("export default { server: { port: 'eighty' } };").unwrap_err();
        assert_eq!(err.code(), "CONFIG_PARSE_ERROR");
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sluice.config.json"),
            r#"{"server": {"port": 9100, "proxy": {"/v1": {"target": "http://127.0.0.1:9", "changeOrigin": true}}}}"#,
        )
        .unwrap();

        let (path, config) = load_config(dir.path(), None).unwrap().unwrap();
        assert_eq!(path, dir.path().join("sluice.config.json"));
        assert_eq!(config.server.port, Some(9100));
        assert!(config.server.proxy.unwrap().0[0].1.change_origin());
    }

    #[test]
    fn test_load_config_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("custom.config.js"),
            "export default { server: { port: 9999 } };",
        )
        .unwrap();

        let (_, config) = load_config(dir.path(), Some(Path::new("custom.config.js")))
            .unwrap()
            .unwrap();
        assert_eq!(config.server.port, Some(9999));
    }

    #[test]
    fn test_load_config_missing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path(), Some(Path::new("nonexistent.config.js"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_load_config_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path(), None).unwrap().is_none());
    }

    #[test]
    fn test_typescript_config() {
        let source = r#"
            import { defineConfig, type UserConfig } from 'vite';

            const config: UserConfig = { root: 'ignored' };

            export default defineConfig({
                root: './web' as string,
                server: { port: 7000, open: false },
            } satisfies UserConfig);
        "#;
        let config = parse_config_source(source, Path::new("vite.config.ts")).unwrap();
        assert_eq!(config.root.as_deref(), Some("./web"));
        assert_eq!(config.server.port, Some(7000));
    }

    #[test]
    fn test_export_default_function_declaration() {
        let source = "export default function () {\n  return { server: { port: 5000 } };\n}\n";
        let config = parse(source).unwrap();
        assert_eq!(config.server.port, Some(5000));
    }

    #[test]
    fn test_syntax_error_has_location() {
        let err = parse("export default {\n  server: { port: 80 \n};").unwrap_err();
        assert_eq!(err.code(), "CONFIG_PARSE_ERROR");
        assert!(err.to_string().contains("sluice.config.js"), "{err}");
    }
}
