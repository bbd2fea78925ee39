//! Import rewriting for unbundled dev serving.
//!
//! Rewrites import specifiers in transpiled code to URLs the browser can
//! fetch from the dev server:
//!
//! - relative and root-absolute imports → `/path/from/root.ts`
//! - aliases and bare specifiers → `/@modules/{specifier}`
//! - stylesheets → `/@style/path/from/root.css`
//! - JSON → `/path/from/root.json?import`
//! - files outside the root (package internals) → `/@fs/abs/path.js`

use crate::bundler::scan::{call_sites, code_lines, is_static_import};
use crate::bundler::{ResolveResult, Resolver};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Characters escaped in rewritten URL paths.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// URL prefix for bare and aliased imports.
pub const MODULES_PREFIX: &str = "/@modules/";
/// URL prefix for stylesheets served as JS modules.
pub const STYLE_PREFIX: &str = "/@style/";
/// URL prefix for files outside the root.
pub const FS_PREFIX: &str = "/@fs/";

/// Rewrites import specifiers in JavaScript for browser consumption.
#[derive(Debug, Clone)]
pub struct ImportRewriter {
    root: PathBuf,
    resolver: Resolver,
}

impl ImportRewriter {
    /// Create a rewriter for a canonical source root.
    #[must_use]
    pub fn new(resolver: Resolver) -> Self {
        Self {
            root: resolver.root().to_path_buf(),
            resolver,
        }
    }

    /// Rewrite all import specifiers in `code`, a module loaded from
    /// `module_path`.
    #[must_use]
    pub fn rewrite(&self, code: &str, module_path: &Path) -> String {
        let mut output = String::with_capacity(code.len());

        for (i, line) in code_lines(code).enumerate() {
            if i > 0 {
                output.push('\n');
            }
            match line.code() {
                Some(text) => output.push_str(&self.rewrite_line(text, module_path)),
                None => output.push_str(line.text),
            }
        }

        output
    }

    fn rewrite_line(&self, line: &str, module_path: &Path) -> String {
        let trimmed = line.trim_start();
        let mut line = line.to_string();

        let is_export_from = trimmed.starts_with("export ") && trimmed.contains(" from ");
        if is_static_import(trimmed) || is_export_from {
            let parts = extract_from_specifier(&line).or_else(|| extract_side_effect_import(&line));
            if let Some((before, specifier, after, quote)) = parts {
                let url = self.rewrite_specifier(&specifier, module_path);
                line = format!("{before}{quote}{url}{quote}{after}");
            }
        }

        if line.contains("import(") {
            line = self.rewrite_dynamic_imports(&line, module_path);
        }

        line
    }

    /// Rewrite `import("x")` calls with a string-literal argument.
    fn rewrite_dynamic_imports(&self, line: &str, module_path: &Path) -> String {
        let sites = call_sites(line, "import");
        if sites.is_empty() {
            return line.to_string();
        }

        let mut out = String::with_capacity(line.len());
        let mut last = 0;
        for site in sites {
            out.push_str(&line[last..site.start]);
            let url = self.rewrite_specifier(&site.specifier, module_path);
            out.push_str(&format!("import(\"{url}\")"));
            last = site.end;
        }
        out.push_str(&line[last..]);
        out
    }

    /// Map one specifier to the URL the browser should request.
    ///
    /// Specifiers that cannot be resolved are left as written; the browser
    /// then reports the failing import itself.
    #[must_use]
    pub fn rewrite_specifier(&self, specifier: &str, module_path: &Path) -> String {
        if specifier.starts_with("/@")
            || specifier.starts_with("http://")
            || specifier.starts_with("https://")
            || specifier.starts_with("data:")
        {
            return specifier.to_string();
        }

        let is_path = specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier.starts_with('/')
            || specifier == ".";
        let is_style = has_extension(specifier, "css");

        // Bare and aliased scripts go through /@modules/ so the server resolves
        // them the same way the build does.
        if !is_path && !is_style {
            return format!("{MODULES_PREFIX}{specifier}");
        }

        // Root-absolute specifiers are URLs already.
        let from = if specifier.starts_with('/') {
            self.root.join("_")
        } else {
            module_path.to_path_buf()
        };
        let lookup = match specifier.strip_prefix('/') {
            Some(rest) => format!("./{rest}"),
            None => specifier.to_string(),
        };

        match self.resolver.resolve(&lookup, &from) {
            Ok(ResolveResult::Found(path)) => {
                let path = dunce::canonicalize(&path).unwrap_or(path);
                self.url_for_import(&path)
            }
            Ok(ResolveResult::Builtin(_)) => specifier.to_string(),
            Err(e) => {
                debug!(specifier, from = %module_path.display(), error = %e.message, "leaving import unresolved");
                specifier.to_string()
            }
        }
    }

    /// URL for a resolved import target.
    #[must_use]
    pub fn url_for_import(&self, path: &Path) -> String {
        let url = self.url_for(path);
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("css") => {
                format!("{STYLE_PREFIX}{}", url.trim_start_matches('/'))
            }
            Some(ext) if ext.eq_ignore_ascii_case("json") => format!("{url}?import"),
            _ => url,
        }
    }

    /// URL path under which `path` is served.
    #[must_use]
    pub fn url_for(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => format!("/{}", encode_components(rel)),
            Err(_) => format!("{FS_PREFIX}{}", encode_components(path)),
        }
    }
}

fn encode_components(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .map(|part| utf8_percent_encode(&part, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn has_extension(specifier: &str, ext: &str) -> bool {
    specifier
        .rsplit_once('.')
        .is_some_and(|(_, e)| e.eq_ignore_ascii_case(ext))
}

/// Extract the `from 'specifier'` portion of an import/export line.
///
/// Returns (`before_quote`, specifier, `after_quote`, `quote_char`).
fn extract_from_specifier(line: &str) -> Option<(String, String, String, char)> {
    let from_idx = line.rfind(" from ")?;
    let after_from = line[from_idx + 6..].trim_start();
    let quote = after_from.chars().next()?;

    if quote != '\'' && quote != '"' {
        return None;
    }

    let inner = &after_from[1..];
    let end_idx = inner.find(quote)?;
    let specifier = inner[..end_idx].to_string();
    let before = format!("{} from ", &line[..from_idx]);

    Some((before, specifier, inner[end_idx + 1..].to_string(), quote))
}

/// Extract specifier from a side-effect import: `import 'xxx'` or `import "xxx"`.
fn extract_side_effect_import(line: &str) -> Option<(String, String, String, char)> {
    let trimmed = line.trim_start();
    let after_import = trimmed.strip_prefix("import")?.trim_start();
    let quote = after_import.chars().next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }

    let inner = &after_import[1..];
    let end_idx = inner.find(quote)?;
    let specifier = inner[..end_idx].to_string();

    let leading_ws = &line[..line.len() - trimmed.len()];
    let before = format!("{leading_ws}import ");

    Some((before, specifier, inner[end_idx + 1..].to_string(), quote))
}
