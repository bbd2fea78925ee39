//! Import and export scanning of transpiled modules.
//!
//! Works line by line on SWC codegen output, where every import and export
//! declaration head sits on a single line. Lines that begin inside a
//! template literal or block comment are text, not statements, and are
//! skipped.

/// An import found in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// The import specifier (e.g., "./utils", "htmx.org", "@scope/pkg").
    pub specifier: String,
    /// Whether this is a dynamic `import()`.
    pub dynamic: bool,
}

/// Names a module exports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exports {
    /// Exported names, including `default` and named re-exports.
    pub names: Vec<String>,
    /// Specifiers of `export * from` statements.
    pub star_from: Vec<String>,
}

/// One entry of an `{ a, b as c }` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedBinding {
    /// Name on the exporting side.
    pub imported: String,
    /// Name on the importing side.
    pub local: String,
}

/// Find every import, re-export source, dynamic import and `require` call.
///
/// Specifiers are deduplicated, keeping first occurrence order.
#[must_use]
pub fn scan_imports(code: &str) -> Vec<Import> {
    let mut imports: Vec<Import> = Vec::new();
    let mut push = |specifier: String, dynamic: bool| {
        if !imports.iter().any(|i| i.specifier == specifier) {
            imports.push(Import { specifier, dynamic });
        }
    };

    for line in code_lines(code).filter_map(CodeLine::code) {
        let trimmed = line.trim();

        if is_static_import(trimmed) || (trimmed.starts_with("export ") && trimmed.contains(" from ")) {
            if let Some(spec) = statement_specifier(trimmed) {
                push(spec, false);
            }
        }

        for spec in call_specifiers(line, "import") {
            push(spec, true);
        }
        for spec in call_specifiers(line, "require") {
            push(spec, false);
        }
    }

    imports
}

/// Collect the names exported by a transpiled module.
#[must_use]
pub fn scan_exports(code: &str) -> Exports {
    let mut exports = Exports::default();
    let mut add = |name: String| {
        if !name.is_empty() && !exports.names.contains(&name) {
            exports.names.push(name);
        }
    };

    for line in code_lines(code).filter_map(CodeLine::code) {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix("export ") else {
            continue;
        };

        if rest.starts_with("default ") || rest == "default" {
            add("default".to_string());
        } else if let Some(after) = rest.strip_prefix("* as ") {
            add(leading_identifier(after));
        } else if rest.starts_with('*') {
            if let Some(spec) = statement_specifier(trimmed) {
                exports.star_from.push(spec);
            }
        } else if rest.starts_with('{') {
            for binding in parse_named_list(rest) {
                add(binding.local);
            }
        } else if let Some(name) = declaration_name(rest) {
            add(name);
        } else if let Some(names) = variable_names(rest) {
            for name in names {
                add(name);
            }
        }
    }

    exports
}

/// One line of a module, and whether it starts in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CodeLine<'a> {
    pub text: &'a str,
    /// `false` when the line continues a template literal or block comment.
    pub in_code: bool,
}

impl<'a> CodeLine<'a> {
    pub(crate) fn code(self) -> Option<&'a str> {
        self.in_code.then_some(self.text)
    }
}

/// Split `code` into lines, tracking template literals across them.
pub(crate) fn code_lines(code: &str) -> impl Iterator<Item = CodeLine<'_>> {
    let mut lexer = LineLexer::default();
    code.split('\n').map(move |text| {
        let in_code = lexer.in_code();
        lexer.advance(text);
        CodeLine { text, in_code }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    /// Inside a template literal.
    Template,
    /// Inside `${ ... }`, counting unclosed braces.
    Substitution(u32),
}

/// Just enough of a JavaScript lexer to know where literals end.
#[derive(Debug, Default)]
struct LineLexer {
    stack: Vec<Context>,
    block_comment: bool,
}

impl LineLexer {
    fn in_code(&self) -> bool {
        !self.block_comment && self.stack.last() != Some(&Context::Template)
    }

    fn advance(&mut self, line: &str) {
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if self.block_comment {
                if c == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    self.block_comment = false;
                    i += 1;
                }
            } else if self.stack.last() == Some(&Context::Template) {
                match c {
                    b'\\' => i += 1,
                    b'`' => {
                        self.stack.pop();
                    }
                    b'$' if bytes.get(i + 1) == Some(&b'{') => {
                        self.stack.push(Context::Substitution(0));
                        i += 1;
                    }
                    _ => {}
                }
            } else {
                match c {
                    b'`' => self.stack.push(Context::Template),
                    b'\'' | b'"' => i = skip_string(bytes, i),
                    b'/' if bytes.get(i + 1) == Some(&b'/') => return,
                    b'/' if bytes.get(i + 1) == Some(&b'*') => {
                        self.block_comment = true;
                        i += 1;
                    }
                    b'{' => {
                        if let Some(Context::Substitution(depth)) = self.stack.last_mut() {
                            *depth += 1;
                        }
                    }
                    b'}' => match self.stack.last_mut() {
                        Some(Context::Substitution(0)) => {
                            self.stack.pop();
                        }
                        Some(Context::Substitution(depth)) => *depth -= 1,
                        _ => {}
                    },
                    _ => {}
                }
            }
            i += 1;
        }
    }
}

/// Index of the closing quote of the string opening at `start`.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            c if c == quote => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// `import ...` statement (not a dynamic `import(...)` or `import.meta`).
pub(crate) fn is_static_import(trimmed: &str) -> bool {
    trimmed.starts_with("import ")
        || trimmed.starts_with("import\"")
        || trimmed.starts_with("import'")
        || trimmed.starts_with("import{")
        || trimmed.starts_with("import*")
}

/// Specifier of an import/export statement line.
pub(crate) fn statement_specifier(trimmed: &str) -> Option<String> {
    if let Some(from_idx) = trimmed.rfind(" from ") {
        return extract_string_literal(&trimmed[from_idx + 6..]);
    }
    if let Some(from_idx) = trimmed.rfind("from\"").or_else(|| trimmed.rfind("from'")) {
        return extract_string_literal(&trimmed[from_idx + 4..]);
    }
    // Side-effect import: import 'xxx' or import "xxx"
    trimmed
        .strip_prefix("import")
        .and_then(extract_string_literal)
}

/// String-literal arguments of `name(...)` calls on one line.
///
/// Only calls whose first argument is a plain string literal count, and the
/// name must not be a property (`obj.import(`) or part of a longer identifier.
pub(crate) fn call_specifiers(line: &str, name: &str) -> Vec<String> {
    call_sites(line, name)
        .into_iter()
        .map(|site| site.specifier)
        .collect()
}

/// A `name("spec")` call located in a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallSite {
    /// Byte range of the whole `name("spec")` text.
    pub start: usize,
    pub end: usize,
    pub specifier: String,
}

pub(crate) fn call_sites(line: &str, name: &str) -> Vec<CallSite> {
    let mut sites = Vec::new();
    let pattern = format!("{name}(");
    let mut offset = 0;

    while let Some(found) = line[offset..].find(&pattern) {
        let start = offset + found;
        let args = start + pattern.len();
        offset = args;

        let preceded_ok = line[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !(is_ident_char(c) || c == '.'));
        if !preceded_ok {
            continue;
        }

        let after = &line[args..];
        let ws = after.len() - after.trim_start().len();
        let Some(specifier) = extract_string_literal(after) else {
            continue;
        };
        // quote + content + quote
        let lit_end = args + ws + specifier.len() + 2;
        let rest = &line[lit_end..];
        let close_ws = rest.len() - rest.trim_start().len();
        if !rest.trim_start().starts_with(')') {
            continue;
        }

        sites.push(CallSite {
            start,
            end: lit_end + close_ws + 1,
            specifier,
        });
        offset = lit_end;
    }

    sites
}

/// Parse the `{ ... }` list at the start of `s`.
pub(crate) fn parse_named_list(s: &str) -> Vec<NamedBinding> {
    let Some(open) = s.find('{') else {
        return Vec::new();
    };
    let Some(close) = s[open..].find('}') else {
        return Vec::new();
    };

    s[open + 1..open + close]
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let part = part.strip_prefix("type ").unwrap_or(part);
            let (imported, local) = match part.split_once(" as ") {
                Some((imported, local)) => (imported.trim(), local.trim()),
                None => (part, part),
            };
            (!imported.is_empty() && !local.is_empty()).then(|| NamedBinding {
                imported: unquote(imported),
                local: unquote(local),
            })
        })
        .collect()
}

/// Name declared by `function name(`, `async function name(`, `class Name`.
pub(crate) fn declaration_name(decl: &str) -> Option<String> {
    let rest = decl.strip_prefix("async ").unwrap_or(decl);
    let rest = if let Some(r) = rest.strip_prefix("function") {
        r.trim_start().trim_start_matches('*').trim_start()
    } else if let Some(r) = rest.strip_prefix("class ") {
        r
    } else {
        return None;
    };
    let name = leading_identifier(rest);
    (!name.is_empty()).then_some(name)
}

/// Names declared by `const a = ..., b = ...;` (declarators on this line).
pub(crate) fn variable_names(decl: &str) -> Option<Vec<String>> {
    let rest = ["const ", "let ", "var "]
        .iter()
        .find_map(|kw| decl.strip_prefix(kw))?;

    let mut names = Vec::new();
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut expect_name = true;
    let chars: Vec<(usize, char)> = rest.char_indices().collect();

    for &(i, c) in &chars {
        if let Some(q) = in_string {
            if c == q {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => in_string = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => expect_name = true,
            _ if expect_name && depth == 0 && is_ident_char(c) => {
                let name = leading_identifier(&rest[i..]);
                if !name.is_empty() {
                    names.push(name);
                }
                expect_name = false;
            }
            _ => {}
        }
    }

    Some(names)
}

/// Identifier at the start of `s`.
pub(crate) fn leading_identifier(s: &str) -> String {
    s.trim_start().chars().take_while(|&c| is_ident_char(c)).collect()
}

/// Extract a string literal from the start of a string.
pub(crate) fn extract_string_literal(s: &str) -> Option<String> {
    let s = s.trim_start();
    let quote = s.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let end = s[1..].find(quote)?;
    Some(s[1..=end].to_string())
}

fn unquote(s: &str) -> String {
    s.trim_matches(|c| c == '"' || c == '\'').to_string()
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_imports() {
        let code = r#"import "htmx.org";
import './tailwind.css';
import { a, b as c } from "./util";
import def, * as ns from './ns';
export { x } from "./reexport";
export * from "./star";
const lazy = () => import("./lazy");
const cjs = require('./legacy');
const notMine = obj.require("./nope");
import { a as again } from "./util";
"#;
        let specs: Vec<_> = scan_imports(code).into_iter().map(|i| (i.specifier, i.dynamic)).collect();
        assert_eq!(
            specs,
            vec![
                ("htmx.org".to_string(), false),
                ("./tailwind.css".to_string(), false),
                ("./util".to_string(), false),
                ("./ns".to_string(), false),
                ("./reexport".to_string(), false),
                ("./star".to_string(), false),
                ("./lazy".to_string(), true),
                ("./legacy".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_import_meta_is_not_an_import() {
        assert!(scan_imports("console.log(import.meta.url);").is_empty());
        assert!(scan_imports("const m = import(name);").is_empty());
    }

    #[test]
    fn test_scan_exports() {
        let code = r#"export function init(root, actions) {
}
export async function load() {}
export class Widget extends Base {
}
export const A = 1, B = [1, 2], C = { d: 1 };
export { helper, internal as external };
export { x as y } from "./other";
export * as ns from "./ns";
export * from "./star";
export default init;
"#;
        let exports = scan_exports(code);
        assert_eq!(
            exports.names,
            vec!["init", "load", "Widget", "A", "B", "C", "external", "y", "ns", "default"]
        );
        assert_eq!(exports.star_from, vec!["./star"]);
    }

    #[test]
    fn test_parse_named_list() {
        let list = parse_named_list("{ a, b as c, default as d }");
        assert_eq!(list.len(), 3);
        assert_eq!(list[1].imported, "b");
        assert_eq!(list[1].local, "c");
        assert_eq!(list[2].imported, "default");
    }

    #[test]
    fn test_template_lines_are_not_statements() {
        let code = "const page = `\nimport { a } from \"./a\";\nexport const b = ${ {x: 1}.x };\n`;\nimport { c } from \"./c\";\n/*\nexport const d = 1;\n*/\nexport const e = `${\"`\"}`;\nexport const f = 1;\n";
        let specs: Vec<_> = scan_imports(code).into_iter().map(|i| i.specifier).collect();
        assert_eq!(specs, vec!["./c"]);
        assert_eq!(scan_exports(code).names, vec!["e", "f"]);

        let starts: Vec<bool> = code_lines(code).map(|l| l.in_code).collect();
        assert_eq!(starts, vec![true, false, false, false, true, true, false, false, true, true, true]);
    }

    #[test]
    fn test_call_sites() {
        let line = r#"Promise.all([import("./a"), import( './b' )]);"#;
        let sites = call_sites(line, "import");
        assert_eq!(sites.len(), 2);
        assert_eq!(&line[sites[0].start..sites[0].end], r#"import("./a")"#);
        assert_eq!(&line[sites[1].start..sites[1].end], "import( './b' )");
    }
}
