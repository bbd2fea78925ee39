//! CSS processing using lightningcss.
//!
//! Stylesheets imported by the client are parsed, vendor-prefixed for the
//! default browser targets, and minified when the build asks for it. The dev
//! server wraps them in a small JS module that injects a `<style>` tag.

use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use thiserror::Error;

/// Options for [`process_css`].
#[derive(Debug, Clone, Default)]
pub struct CssOptions {
    pub minify: bool,
    /// Shown in error messages.
    pub filename: Option<String>,
}

/// Parse, lower and print one stylesheet.
///
/// Nesting is flattened and vendor prefixes are added for
/// [`browser_targets`]; whitespace is removed when `minify` is set.
pub fn process_css(source: &str, options: &CssOptions) -> Result<String, CssError> {
    let file = options.filename.clone().unwrap_or_else(|| "input.css".to_string());
    let targets = Targets::from(browser_targets());

    let mut stylesheet = StyleSheet::parse(
        source,
        ParserOptions {
            filename: file.clone(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| CssError::Parse {
        file: file.clone(),
        message: e.to_string(),
    })?;

    stylesheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| CssError::Lower {
            file: file.clone(),
            message: e.to_string(),
        })?;

    let printed = stylesheet
        .to_css(PrinterOptions {
            minify: options.minify,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| CssError::Print {
            file,
            message: e.to_string(),
        })?;

    Ok(printed.code)
}

/// Oldest browsers the emitted CSS must work in: Chrome and Edge 80,
/// Firefox 75, Safari 13. Versions are encoded as `major << 16`.
fn browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        edge: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        ..Browsers::default()
    }
}

/// Create a JS module that injects `css` as a `<style>` tag.
///
/// `id` names the tag, so evaluating the module again (after a reload of the
/// importing module) replaces the previous tag instead of adding one.
#[must_use]
pub fn create_css_module(css: &str, id: &str) -> String {
    let escaped = css
        .replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${");
    let id = id.replace('\\', "\\\\").replace('"', "\\\"");

    format!(
        r#"const css = `{escaped}`;
const id = "{id}";
let style = document.querySelector(`style[data-sluice-css="${{id}}"]`);
if (!style) {{
  style = document.createElement('style');
  style.setAttribute('data-sluice-css', id);
  document.head.appendChild(style);
}}
style.textContent = css;

export default css;
"#
    )
}

/// Stylesheet failure.
#[derive(Debug, Error)]
pub enum CssError {
    #[error("{file}: {message}")]
    Parse { file: String, message: String },

    #[error("{file}: failed to lower: {message}")]
    Lower { file: String, message: String },

    #[error("{file}: failed to print: {message}")]
    Print { file: String, message: String },
}
