//! SWC implementation of [`CompilerBackend`].
//!
//! Parse, strip TypeScript (type-only imports included), then re-emit with
//! hygiene and parenthesis fixing. Output targets ES2022.

#![allow(clippy::default_trait_access)]

use super::{is_script, CompilerBackend, CompilerError, SyntaxError, TranspileOutput, TranspileSpec};
use std::path::Path;
use swc_common::{
    comments::SingleThreadedComments, sync::Lrc, FileName, Globals, Mark, SourceFile, SourceMap,
    Spanned, GLOBALS,
};
use swc_ecma_ast::{EsVersion, Module, Program};
use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};
use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
use swc_ecma_transforms_typescript::strip;
use swc_ecma_visit::FoldWith;

const TARGET: EsVersion = EsVersion::Es2022;

/// Stateless SWC backend; every call gets its own source map and globals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwcBackend;

impl SwcBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CompilerBackend for SwcBackend {
    fn transpile(&self, spec: &TranspileSpec, source: &str) -> Result<TranspileOutput, CompilerError> {
        let path = &spec.input_path;
        if !is_script(path) {
            let reason = if is_jsx(path) {
                "JSX has no runtime in a library bundle"
            } else {
                "not a script module"
            };
            return Err(CompilerError::Unsupported {
                path: path.clone(),
                reason,
            });
        }

        if source.trim().is_empty() {
            return Ok(TranspileOutput {
                code: String::new(),
                source_map: None,
            });
        }

        Compilation::new(spec, source).run()
    }
}

fn is_jsx(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsx") || ext.eq_ignore_ascii_case("tsx"))
}

fn is_typescript(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ts" | "mts" | "cts"))
}

/// One module going through parse, lower and emit.
struct Compilation<'a> {
    spec: &'a TranspileSpec,
    cm: Lrc<SourceMap>,
    fm: Lrc<SourceFile>,
    comments: SingleThreadedComments,
    typescript: bool,
}

impl<'a> Compilation<'a> {
    fn new(spec: &'a TranspileSpec, source: &str) -> Self {
        let cm: Lrc<SourceMap> = Default::default();
        let name = spec
            .input_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("input.js")
            .to_string();
        let fm = cm.new_source_file(Lrc::new(FileName::Custom(name)), source.to_string());

        Self {
            spec,
            cm,
            fm,
            comments: SingleThreadedComments::default(),
            typescript: is_typescript(&spec.input_path),
        }
    }

    fn run(self) -> Result<TranspileOutput, CompilerError> {
        let module = self.parse()?;
        let module = self.lower(module);
        self.emit(&module)
    }

    fn parse(&self) -> Result<Module, CompilerError> {
        let syntax = if self.typescript {
            Syntax::Typescript(TsSyntax {
                decorators: true,
                ..Default::default()
            })
        } else {
            Syntax::Es(EsSyntax {
                decorators: true,
                ..Default::default()
            })
        };

        let lexer = Lexer::new(
            syntax,
            TARGET,
            StringInput::from(&*self.fm),
            Some(&self.comments),
        );
        let mut parser = Parser::new_from(lexer);

        let module = parser
            .parse_module()
            .map_err(|e| self.syntax_error(vec![self.locate(&e)]))?;

        let recovered: Vec<SyntaxError> = parser.take_errors().iter().map(|e| self.locate(e)).collect();
        if recovered.is_empty() {
            Ok(module)
        } else {
            Err(self.syntax_error(recovered))
        }
    }

    fn lower(&self, module: Module) -> Module {
        GLOBALS.set(&Globals::default(), || {
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();

            let mut program = Program::Module(module)
                .fold_with(&mut resolver(unresolved_mark, top_level_mark, self.typescript));
            if self.typescript {
                program = program.fold_with(&mut strip(unresolved_mark, top_level_mark));
            }

            let module = match program {
                Program::Module(m) => m,
                Program::Script(s) => Module {
                    span: s.span,
                    body: s.body.into_iter().map(swc_ecma_ast::ModuleItem::Stmt).collect(),
                    shebang: s.shebang,
                },
            };

            module
                .fold_with(&mut hygiene())
                .fold_with(&mut fixer(Some(&self.comments)))
        })
    }

    fn emit(&self, module: &Module) -> Result<TranspileOutput, CompilerError> {
        let minify = self.spec.minify;
        let mut buf = Vec::new();
        let mut mappings = Vec::new();

        {
            let mut emitter = Emitter {
                cfg: swc_ecma_codegen::Config::default()
                    .with_minify(minify)
                    .with_target(TARGET),
                cm: self.cm.clone(),
                comments: if minify { None } else { Some(&self.comments) },
                wr: JsWriter::new(self.cm.clone(), "\n", &mut buf, Some(&mut mappings)),
            };
            emitter
                .emit_module(module)
                .map_err(|e| self.emit_error(e.to_string()))?;
        }

        let code = String::from_utf8(buf).map_err(|e| self.emit_error(e.to_string()))?;

        let source_map = if self.spec.sourcemap {
            let mut map_buf = Vec::new();
            self.cm
                .build_source_map(&mappings)
                .to_writer(&mut map_buf)
                .map_err(|e| self.emit_error(format!("source map: {e}")))?;
            Some(String::from_utf8(map_buf).map_err(|e| self.emit_error(e.to_string()))?)
        } else {
            None
        };

        Ok(TranspileOutput { code, source_map })
    }

    fn locate(&self, e: &swc_ecma_parser::error::Error) -> SyntaxError {
        let loc = self.cm.lookup_char_pos(e.span().lo);
        SyntaxError {
            message: e.kind().msg().to_string(),
            line: u32::try_from(loc.line).unwrap_or(u32::MAX),
            column: u32::try_from(loc.col.0 + 1).unwrap_or(u32::MAX),
        }
    }

    fn syntax_error(&self, errors: Vec<SyntaxError>) -> CompilerError {
        CompilerError::Syntax {
            path: self.spec.input_path.clone(),
            errors,
        }
    }

    fn emit_error(&self, message: impl Into<String>) -> CompilerError {
        CompilerError::Emit {
            path: self.spec.input_path.clone(),
            message: message.into(),
        }
    }
}
