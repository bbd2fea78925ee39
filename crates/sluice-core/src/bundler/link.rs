//! Module linking.
//!
//! Turns one transpiled module into the body of its `__modules[id]`
//! factory. The module is parsed again with SWC and resolved, so that:
//!
//! - exports become getters installed before any dependency is required
//! - each imported module is bound once, as `const __mN = require(N)`,
//!   hoisted to the top of the factory
//! - every reference to an imported name reads through that namespace
//!   (`__mN.count`), so bindings stay live and cyclic imports only touch
//!   each other's exports when the code actually runs
//!
//! The body is printed by SWC codegen, which keeps string and template
//! literal text exactly as written.

#![allow(clippy::default_trait_access)]

use super::graph::{Module, ModuleGraph, ModuleId, ModuleKind};
use super::BundleError;
use crate::build::codes;
use std::collections::HashMap;
use swc_common::{
    comments::SingleThreadedComments, sync::Lrc, FileName, Globals, Mark, SourceFile, SourceMap,
    Span, SyntaxContext, DUMMY_SP, GLOBALS,
};
use swc_ecma_ast::{
    ArrowExpr, BindingIdent, BlockStmtOrExpr, CallExpr, Callee, ClassDecl, ClassExpr, ComputedPropName,
    Decl, DefaultDecl, EsVersion, ExportDecl, ExportDefaultDecl, ExportDefaultExpr, ExportSpecifier,
    Expr, ExprOrSpread, ExprStmt, FnDecl, FnExpr, Id, Ident, IdentName, ImportDecl, ImportSpecifier,
    KeyValueProp, Lit, MemberExpr, MemberProp, Module as Program, ModuleDecl, ModuleExportName,
    ModuleItem, NamedExport, Number, ObjectLit, ObjectPatProp, Pat, Prop, PropName, PropOrSpread,
    SeqExpr, Stmt, Str, VarDecl, VarDeclKind, VarDeclarator,
};
use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};
use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
use swc_ecma_visit::{FoldWith, VisitMut, VisitMutWith};

const TARGET: EsVersion = EsVersion::Es2022;

/// A factory body and where its code came from.
#[derive(Debug)]
pub(crate) struct LinkedModule {
    pub id: ModuleId,
    pub body: String,
    /// Body positions mapped onto the transpiled code.
    pub mappings: Vec<Mapping>,
}

/// One position of a factory body. Lines and columns are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    /// Position in the module's transpiled code.
    pub line: u32,
    pub column: u32,
}

/// Link one module. Stylesheets produce no factory.
pub(crate) fn link_module(
    id: ModuleId,
    module: &Module,
    graph: &ModuleGraph,
    minify: bool,
    sourcemap: bool,
) -> Result<Option<LinkedModule>, BundleError> {
    let body = match module.kind {
        ModuleKind::Css => return Ok(None),
        ModuleKind::Json => {
            let sp = if minify { "" } else { " " };
            format!("module.exports{sp}={sp}{};", module.code)
        }
        ModuleKind::Script if module.code.trim().is_empty() => String::new(),
        ModuleKind::Script => {
            let linker = ScriptLinker::new(id, module, graph);
            return linker
                .run(minify, sourcemap && module.map.is_some())
                .map(Some)
                .map_err(|message| BundleError {
                    code: codes::BUILD_COMPILE_ERROR,
                    message,
                    path: Some(module.path.display().to_string()),
                });
        }
    };

    Ok(Some(LinkedModule {
        id,
        body,
        mappings: Vec::new(),
    }))
}

/// Parse, rewrite and print one script module.
struct ScriptLinker<'a> {
    id: ModuleId,
    graph: &'a ModuleGraph,
    cm: Lrc<SourceMap>,
    fm: Lrc<SourceFile>,
    comments: SingleThreadedComments,
}

impl<'a> ScriptLinker<'a> {
    fn new(id: ModuleId, module: &Module, graph: &'a ModuleGraph) -> Self {
        let cm: Lrc<SourceMap> = Default::default();
        let name = module
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("module.js")
            .to_string();
        let fm = cm.new_source_file(Lrc::new(FileName::Custom(name)), module.code.clone());

        Self {
            id,
            graph,
            cm,
            fm,
            comments: SingleThreadedComments::default(),
        }
    }

    fn run(self, minify: bool, sourcemap: bool) -> Result<LinkedModule, String> {
        let program = self.parse()?;

        let program = GLOBALS.set(&Globals::default(), || -> Result<Program, String> {
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();
            let program = program.fold_with(&mut resolver(unresolved_mark, top_level_mark, false));

            let unresolved = SyntaxContext::empty().apply_mark(unresolved_mark);
            let mut linker = Linker::new(self.id, self.graph, unresolved);
            let body = linker.link(program.body)?;

            Ok(Program {
                span: program.span,
                body: body.into_iter().map(ModuleItem::Stmt).collect(),
                shebang: None,
            }
            .fold_with(&mut hygiene())
            .fold_with(&mut fixer(Some(&self.comments))))
        })?;

        self.print(&program, minify, sourcemap)
    }

    fn parse(&self) -> Result<Program, String> {
        let syntax = Syntax::Es(EsSyntax {
            decorators: true,
            ..Default::default()
        });
        let lexer = Lexer::new(syntax, TARGET, StringInput::from(&*self.fm), Some(&self.comments));
        let mut parser = Parser::new_from(lexer);

        let program = parser
            .parse_module()
            .map_err(|e| format!("failed to link module: {}", e.kind().msg()))?;
        match parser.take_errors().first() {
            Some(e) => Err(format!("failed to link module: {}", e.kind().msg())),
            None => Ok(program),
        }
    }

    fn print(&self, program: &Program, minify: bool, sourcemap: bool) -> Result<LinkedModule, String> {
        let mut buf = Vec::new();
        let mut raw = Vec::new();

        {
            let mut emitter = Emitter {
                cfg: swc_ecma_codegen::Config::default()
                    .with_minify(minify)
                    .with_target(TARGET),
                cm: self.cm.clone(),
                comments: if minify { None } else { Some(&self.comments) },
                wr: JsWriter::new(
                    self.cm.clone(),
                    "\n",
                    &mut buf,
                    sourcemap.then_some(&mut raw),
                ),
            };
            emitter
                .emit_module(program)
                .map_err(|e| format!("failed to print module: {e}"))?;
        }

        let body = String::from_utf8(buf).map_err(|e| format!("failed to print module: {e}"))?;

        let mappings = raw
            .into_iter()
            .filter(|(pos, _)| !pos.is_dummy() && *pos >= self.fm.start_pos && *pos <= self.fm.end_pos)
            .filter_map(|(pos, generated)| {
                let loc = self.cm.try_lookup_char_pos(pos).ok()?;
                Some(Mapping {
                    generated_line: generated.line,
                    generated_column: generated.col,
                    line: u32::try_from(loc.line.saturating_sub(1)).ok()?,
                    column: u32::try_from(loc.col.0).ok()?,
                })
            })
            .collect();

        Ok(LinkedModule {
            id: self.id,
            body: body.trim_end().to_string(),
            mappings,
        })
    }
}

/// What an imported local name reads.
#[derive(Debug, Clone)]
enum Binding {
    /// `import { name as local }`: a property of the namespace.
    Member(Ident, String),
    /// `import local from`: the default export, or the whole CommonJS value.
    Default(Ident),
    /// `import * as local from`.
    Namespace(Ident),
}

impl Binding {
    fn read(&self, unresolved: SyntaxContext, span: Span) -> Expr {
        match self {
            Self::Member(ns, name) => member(Expr::Ident(ns.clone()), name, span),
            Self::Default(ns) => call(
                global("__default", unresolved),
                vec![Expr::Ident(ns.clone())],
                span,
            ),
            Self::Namespace(ns) => Expr::Ident(Ident::new(ns.sym.clone(), span, ns.ctxt)),
        }
    }
}

/// Import and export rewriting state for one module.
struct Linker<'a> {
    id: ModuleId,
    graph: &'a ModuleGraph,
    /// Context of unresolved (global) references, such as the factory's
    /// `require` and `exports` parameters.
    unresolved: SyntaxContext,
    namespaces: HashMap<ModuleId, Ident>,
    bindings: HashMap<Id, Binding>,
    /// Dependency requires and re-exports, in import order.
    prelude: Vec<Stmt>,
    /// `(exported name, value)` pairs.
    getters: Vec<(String, Expr)>,
    is_esm: bool,
}

impl<'a> Linker<'a> {
    fn new(id: ModuleId, graph: &'a ModuleGraph, unresolved: SyntaxContext) -> Self {
        Self {
            id,
            graph,
            unresolved,
            namespaces: HashMap::new(),
            bindings: HashMap::new(),
            prelude: Vec::new(),
            getters: Vec::new(),
            is_esm: false,
        }
    }

    fn link(&mut self, items: Vec<ModuleItem>) -> Result<Vec<Stmt>, String> {
        let mut body = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ModuleItem::Stmt(stmt) => body.push(stmt),
                ModuleItem::ModuleDecl(decl) => {
                    self.is_esm = true;
                    self.module_decl(decl, &mut body)?;
                }
            }
        }

        let mut out = Vec::with_capacity(body.len() + self.prelude.len() + 1);
        if self.is_esm {
            out.push(self.export_stmt());
        }
        out.append(&mut self.prelude);
        out.append(&mut body);

        let mut references = References {
            id: self.id,
            graph: self.graph,
            unresolved: self.unresolved,
            bindings: &self.bindings,
        };
        out.visit_mut_with(&mut references);
        Ok(out)
    }

    fn module_decl(&mut self, decl: ModuleDecl, body: &mut Vec<Stmt>) -> Result<(), String> {
        match decl {
            ModuleDecl::Import(import) => self.import(import)?,
            ModuleDecl::ExportDecl(ExportDecl { decl, .. }) => {
                match &decl {
                    Decl::Fn(f) => self.export_local(&f.ident),
                    Decl::Class(c) => self.export_local(&c.ident),
                    Decl::Var(v) => {
                        for declarator in &v.decls {
                            for ident in binding_idents(&declarator.name) {
                                self.export_local(&ident);
                            }
                        }
                    }
                    Decl::Using(_) => {}
                    // Type-level declarations have no runtime value.
                    _ => return Ok(()),
                }
                body.push(Stmt::Decl(decl));
            }
            ModuleDecl::ExportDefaultDecl(ExportDefaultDecl { decl, .. }) => match decl {
                DefaultDecl::Fn(FnExpr { ident, function }) => {
                    let ident = ident.unwrap_or_else(|| Ident::new_private("_default".into(), DUMMY_SP));
                    self.getter("default", Expr::Ident(ident.clone()));
                    body.push(Stmt::Decl(Decl::Fn(FnDecl {
                        ident,
                        declare: false,
                        function,
                    })));
                }
                DefaultDecl::Class(ClassExpr { ident, class }) => {
                    let ident = ident.unwrap_or_else(|| Ident::new_private("_default".into(), DUMMY_SP));
                    self.getter("default", Expr::Ident(ident.clone()));
                    body.push(Stmt::Decl(Decl::Class(ClassDecl {
                        ident,
                        declare: false,
                        class,
                    })));
                }
                DefaultDecl::TsInterfaceDecl(_) => {}
            },
            ModuleDecl::ExportDefaultExpr(ExportDefaultExpr { span, expr }) => {
                let ident = Ident::new_private("_default".into(), DUMMY_SP);
                self.getter("default", Expr::Ident(ident.clone()));
                body.push(const_decl(ident, *expr, span));
            }
            ModuleDecl::ExportNamed(named) => self.export_named(named)?,
            ModuleDecl::ExportAll(all) => {
                if !all.type_only {
                    let dep = self.dep(&all.src.value)?;
                    let ns = self.namespace(dep, all.span);
                    self.prelude.push(expr_stmt(call(
                        global("__reexport", self.unresolved),
                        vec![global("exports", self.unresolved), Expr::Ident(ns)],
                        all.span,
                    )));
                }
            }
            ModuleDecl::TsImportEquals(_)
            | ModuleDecl::TsExportAssignment(_)
            | ModuleDecl::TsNamespaceExport(_) => {}
        }
        Ok(())
    }

    fn dep(&self, specifier: &str) -> Result<ModuleId, String> {
        self.graph
            .resolve_specifier(self.id, specifier)
            .ok_or_else(|| format!("import '{specifier}' is not part of the module graph"))
    }

    /// The namespace binding for `dep`, required once on first use.
    fn namespace(&mut self, dep: ModuleId, span: Span) -> Ident {
        if let Some(ns) = self.namespaces.get(&dep) {
            return ns.clone();
        }
        let ns = Ident::new_private(format!("__m{dep}").into(), DUMMY_SP);
        let init = require_expr(self.graph, dep, self.unresolved, span);
        self.prelude.push(const_decl(ns.clone(), init, span));
        self.namespaces.insert(dep, ns.clone());
        ns
    }

    fn import(&mut self, import: ImportDecl) -> Result<(), String> {
        if import.type_only {
            return Ok(());
        }
        let dep = self.dep(&import.src.value)?;

        if import.specifiers.is_empty() {
            let is_css = self.graph.get(dep).map(|m| m.kind) == Some(ModuleKind::Css);
            if !is_css && !self.namespaces.contains_key(&dep) {
                self.prelude
                    .push(expr_stmt(require_expr(self.graph, dep, self.unresolved, import.span)));
            }
            return Ok(());
        }

        let ns = self.namespace(dep, import.span);
        for specifier in import.specifiers {
            let (local, binding) = match specifier {
                ImportSpecifier::Named(named) if named.is_type_only => continue,
                ImportSpecifier::Named(named) => {
                    let name = named
                        .imported
                        .as_ref()
                        .map_or_else(|| named.local.sym.to_string(), |n| n.atom().to_string());
                    let binding = if name == "default" {
                        Binding::Default(ns.clone())
                    } else {
                        Binding::Member(ns.clone(), name)
                    };
                    (named.local, binding)
                }
                ImportSpecifier::Default(default) => (default.local, Binding::Default(ns.clone())),
                ImportSpecifier::Namespace(star) => (star.local, Binding::Namespace(ns.clone())),
            };
            self.bindings.insert(local.to_id(), binding);
        }
        Ok(())
    }

    fn export_named(&mut self, named: NamedExport) -> Result<(), String> {
        if named.type_only {
            return Ok(());
        }

        let Some(src) = named.src else {
            for specifier in named.specifiers {
                let ExportSpecifier::Named(specifier) = specifier else {
                    continue;
                };
                if specifier.is_type_only {
                    continue;
                }
                if let ModuleExportName::Ident(orig) = specifier.orig {
                    let exported = specifier
                        .exported
                        .as_ref()
                        .map_or_else(|| orig.sym.to_string(), |e| e.atom().to_string());
                    self.getter(&exported, Expr::Ident(orig));
                }
            }
            return Ok(());
        };

        let dep = self.dep(&src.value)?;
        let ns = self.namespace(dep, named.span);
        for specifier in named.specifiers {
            match specifier {
                ExportSpecifier::Named(specifier) if !specifier.is_type_only => {
                    let orig = specifier.orig.atom().to_string();
                    let exported = specifier
                        .exported
                        .as_ref()
                        .map_or_else(|| orig.clone(), |e| e.atom().to_string());
                    let value = if orig == "default" {
                        Binding::Default(ns.clone())
                    } else {
                        Binding::Member(ns.clone(), orig)
                    };
                    self.getter(&exported, value.read(self.unresolved, specifier.span));
                }
                ExportSpecifier::Namespace(specifier) => {
                    self.getter(&specifier.name.atom().to_string(), Expr::Ident(ns.clone()));
                }
                ExportSpecifier::Named(_) | ExportSpecifier::Default(_) => {}
            }
        }
        Ok(())
    }

    fn export_local(&mut self, ident: &Ident) {
        self.getter(&ident.sym.to_string(), Expr::Ident(ident.clone()));
    }

    fn getter(&mut self, name: &str, value: Expr) {
        if !self.getters.iter().any(|(n, _)| n == name) {
            self.getters.push((name.to_string(), value));
        }
    }

    /// `__export(exports, { name: () => value, ... });`
    fn export_stmt(&mut self) -> Stmt {
        let props = self
            .getters
            .drain(..)
            .map(|(name, value)| {
                PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
                    key: prop_name(&name),
                    value: Box::new(arrow(value)),
                })))
            })
            .collect();
        expr_stmt(call(
            global("__export", self.unresolved),
            vec![
                global("exports", self.unresolved),
                Expr::Object(ObjectLit {
                    span: DUMMY_SP,
                    props,
                }),
            ],
            DUMMY_SP,
        ))
    }
}

/// Rewrites reads of imported names and module-loading calls.
struct References<'a> {
    id: ModuleId,
    graph: &'a ModuleGraph,
    unresolved: SyntaxContext,
    bindings: &'a HashMap<Id, Binding>,
}

impl References<'_> {
    /// Replacement for `import("x")` and `require("x")` with a literal
    /// specifier that is part of the graph.
    fn module_call(&self, call_expr: &CallExpr) -> Option<Expr> {
        let [arg] = call_expr.args.as_slice() else {
            return None;
        };
        let Expr::Lit(Lit::Str(specifier)) = &*arg.expr else {
            return None;
        };
        if arg.spread.is_some() {
            return None;
        }

        let dynamic = match &call_expr.callee {
            Callee::Import(_) => true,
            Callee::Expr(callee) => match &**callee {
                Expr::Ident(i) if &*i.sym == "require" && i.ctxt == self.unresolved => false,
                _ => return None,
            },
            Callee::Super(_) => return None,
        };

        let dep = self.graph.resolve_specifier(self.id, &specifier.value)?;
        let span = call_expr.span;
        let required = require_expr(self.graph, dep, self.unresolved, span);
        if !dynamic {
            return Some(required);
        }

        // Promise.resolve().then(() => require(N))
        let resolved = call(
            member(global("Promise", self.unresolved), "resolve", span),
            Vec::new(),
            span,
        );
        Some(call(member(resolved, "then", span), vec![arrow(required)], span))
    }
}

impl VisitMut for References<'_> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        match expr {
            Expr::Ident(ident) => {
                if let Some(binding) = self.bindings.get(&ident.to_id()) {
                    *expr = binding.read(self.unresolved, ident.span);
                }
            }
            Expr::Call(call_expr) => {
                if let Some(replacement) = self.module_call(call_expr) {
                    *expr = replacement;
                } else {
                    expr.visit_mut_children_with(self);
                }
            }
            _ => expr.visit_mut_children_with(self),
        }
    }

    fn visit_mut_callee(&mut self, callee: &mut Callee) {
        // Imported functions are called without a receiver: `(0, ns.f)()`.
        if let Callee::Expr(expr) = callee {
            if let Expr::Ident(ident) = &**expr {
                if let Some(binding @ Binding::Member(..)) = self.bindings.get(&ident.to_id()) {
                    let read = binding.read(self.unresolved, ident.span);
                    **expr = Expr::Seq(SeqExpr {
                        span: ident.span,
                        exprs: vec![Box::new(number(0)), Box::new(read)],
                    });
                    return;
                }
            }
        }
        callee.visit_mut_children_with(self);
    }

    fn visit_mut_prop(&mut self, prop: &mut Prop) {
        if let Prop::Shorthand(ident) = prop {
            if let Some(binding) = self.bindings.get(&ident.to_id()) {
                let value = binding.read(self.unresolved, ident.span);
                *prop = Prop::KeyValue(KeyValueProp {
                    key: PropName::Ident(IdentName::new(ident.sym.clone(), ident.span)),
                    value: Box::new(value),
                });
                return;
            }
        }
        prop.visit_mut_children_with(self);
    }
}

/// Names bound by a declaration pattern.
fn binding_idents(pat: &Pat) -> Vec<Ident> {
    let mut out = Vec::new();
    collect_binding_idents(pat, &mut out);
    out
}

fn collect_binding_idents(pat: &Pat, out: &mut Vec<Ident>) {
    match pat {
        Pat::Ident(binding) => out.push(binding.id.clone()),
        Pat::Array(array) => {
            for elem in array.elems.iter().flatten() {
                collect_binding_idents(elem, out);
            }
        }
        Pat::Object(object) => {
            for prop in &object.props {
                match prop {
                    ObjectPatProp::KeyValue(kv) => collect_binding_idents(&kv.value, out),
                    ObjectPatProp::Assign(assign) => out.push(assign.key.id.clone()),
                    ObjectPatProp::Rest(rest) => collect_binding_idents(&rest.arg, out),
                }
            }
        }
        Pat::Rest(rest) => collect_binding_idents(&rest.arg, out),
        Pat::Assign(assign) => collect_binding_idents(&assign.left, out),
        Pat::Invalid(_) | Pat::Expr(_) => {}
    }
}

/// `require(N)`, or `{}` for a stylesheet.
fn require_expr(graph: &ModuleGraph, dep: ModuleId, unresolved: SyntaxContext, span: Span) -> Expr {
    match graph.get(dep).map(|m| m.kind) {
        Some(ModuleKind::Css) | None => Expr::Object(ObjectLit { span, props: Vec::new() }),
        Some(_) => call(global("require", unresolved), vec![number(dep)], span),
    }
}

fn global(name: &str, unresolved: SyntaxContext) -> Expr {
    Expr::Ident(Ident::new(name.into(), DUMMY_SP, unresolved))
}

fn number(value: usize) -> Expr {
    Expr::Lit(Lit::Num(Number::from(value)))
}

fn call(callee: Expr, args: Vec<Expr>, span: Span) -> Expr {
    Expr::Call(CallExpr {
        span,
        callee: Callee::Expr(Box::new(callee)),
        args: args
            .into_iter()
            .map(|expr| ExprOrSpread {
                spread: None,
                expr: Box::new(expr),
            })
            .collect(),
        ..Default::default()
    })
}

/// `obj.name`, or `obj["name"]` when `name` is not an identifier.
fn member(obj: Expr, name: &str, span: Span) -> Expr {
    let prop = if is_identifier_name(name) {
        MemberProp::Ident(IdentName::new(name.into(), span))
    } else {
        MemberProp::Computed(ComputedPropName {
            span,
            expr: Box::new(string(name)),
        })
    };
    Expr::Member(MemberExpr {
        span,
        obj: Box::new(obj),
        prop,
    })
}

fn arrow(body: Expr) -> Expr {
    Expr::Arrow(ArrowExpr {
        span: DUMMY_SP,
        params: Vec::new(),
        body: Box::new(BlockStmtOrExpr::Expr(Box::new(body))),
        ..Default::default()
    })
}

fn string(value: &str) -> Expr {
    Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: value.into(),
        raw: None,
    }))
}

fn prop_name(name: &str) -> PropName {
    if is_identifier_name(name) {
        PropName::Ident(IdentName::new(name.into(), DUMMY_SP))
    } else {
        PropName::Str(Str {
            span: DUMMY_SP,
            value: name.into(),
            raw: None,
        })
    }
}

/// Identifier syntax, reserved words included (valid as property names).
fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(expr),
    })
}

fn const_decl(ident: Ident, init: Expr, span: Span) -> Stmt {
    Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span,
        kind: VarDeclKind::Const,
        decls: vec![VarDeclarator {
            span,
            name: Pat::Ident(BindingIdent {
                id: ident,
                type_ann: None,
            }),
            init: Some(Box::new(init)),
            definite: false,
        }],
        ..Default::default()
    })))
}
