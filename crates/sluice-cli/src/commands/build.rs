//! `sluice build` command implementation.
//!
//! One-shot builds print the artifact set (or one JSON object with
//! `--json`). `--watch` builds once, then rebuilds whenever a source file
//! under the root changes; a failed rebuild is reported and watching goes on.

use super::{report, Context};
use miette::{IntoDiagnostic, Result};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use sluice_core::config::BuildConfiguration;
use sluice_core::{build, ArtifactSet, BuildError, BuildMode};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extensions that trigger a rebuild.
const WATCHED_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "css", "json"];

#[derive(Serialize)]
struct BuildErrorJson<'a> {
    ok: bool,
    error: ErrorJson<'a>,
}

#[derive(Serialize)]
struct ErrorJson<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
}

#[derive(Serialize)]
struct BuildResultJson<'a> {
    ok: bool,
    mode: &'a str,
    #[serde(flatten)]
    result: &'a ArtifactSet,
}

/// Run a single build.
pub fn run(ctx: &Context) -> Result<()> {
    let config = ctx.resolve(BuildMode::Production)?;
    let mode = config.mode.as_str();

    match build(&config.build) {
        Ok(set) => {
            if ctx.json {
                let out = BuildResultJson {
                    ok: true,
                    mode,
                    result: &set,
                };
                println!("{}", serde_json::to_string(&out).into_diagnostic()?);
            } else {
                print_artifacts(&set, &ctx.cwd, mode);
            }
            Ok(())
        }
        Err(err) if ctx.json => {
            let out = BuildErrorJson {
                ok: false,
                error: ErrorJson {
                    code: err.code,
                    message: &err.message,
                    path: err.path.as_deref(),
                },
            };
            println!("{}", serde_json::to_string(&out).into_diagnostic()?);
            std::process::exit(1);
        }
        Err(err) => Err(report(err)),
    }
}

/// Build, then rebuild on every debounced batch of changes.
pub fn watch(ctx: &Context, debounce_ms: u64) -> Result<()> {
    let config = ctx.resolve(BuildMode::Production)?;
    let build_config = config.build;
    let mode = config.mode.as_str();

    rebuild(&build_config, &ctx.cwd, mode);

    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, Config::default()).into_diagnostic()?;
    watcher
        .watch(&build_config.root, RecursiveMode::Recursive)
        .into_diagnostic()?;

    eprintln!(
        "watching: {} (debounce: {debounce_ms}ms)",
        display_path(&build_config.root, &ctx.cwd)
    );

    let debounce = Duration::from_millis(debounce_ms);
    let mut changed: HashSet<PathBuf> = HashSet::new();

    loop {
        // Block for the first event of a batch.
        match rx.recv() {
            Ok(Ok(event)) => collect(&mut changed, event.paths, &build_config),
            Ok(Err(e)) => {
                warn!(error = %e, "watch error");
                continue;
            }
            Err(_) => break,
        }

        // Then take everything that arrives before the quiet period ends.
        loop {
            match rx.recv_timeout(debounce) {
                Ok(Ok(event)) => collect(&mut changed, event.paths, &build_config),
                Ok(Err(e)) => warn!(error = %e, "watch error"),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }

        if changed.is_empty() {
            continue;
        }

        let mut paths: Vec<PathBuf> = changed.drain().collect();
        paths.sort();
        for path in &paths {
            debug!(path = %path.display(), "changed");
        }
        info!(files = paths.len(), "change detected, rebuilding");
        rebuild(&build_config, &ctx.cwd, mode);
    }

    Ok(())
}

fn collect(changed: &mut HashSet<PathBuf>, paths: Vec<PathBuf>, config: &BuildConfiguration) {
    for path in paths {
        if is_relevant(&path, config) {
            changed.insert(path);
        }
    }
}

/// Build and print the outcome; errors are reported, never fatal.
fn rebuild(config: &BuildConfiguration, cwd: &Path, mode: &str) {
    match build(config) {
        Ok(set) => print_artifacts(&set, cwd, mode),
        Err(err) => print_error(&err),
    }
}

/// Check whether a changed path should trigger a rebuild.
fn is_relevant(path: &Path, config: &BuildConfiguration) -> bool {
    if should_ignore(path) || path.starts_with(&config.out_dir) {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| WATCHED_EXTENSIONS.contains(&ext))
}

/// Check if a path should be ignored by the file watcher.
fn should_ignore(path: &Path) -> bool {
    let path_str = path.to_string_lossy();

    if path_str.contains("/node_modules/")
        || path_str.contains("/.git/")
        || path_str.contains("/target/")
    {
        return true;
    }

    // Dotfiles cover editor swap files and our own staging directories.
    path.file_name()
        .map(|name| name.to_string_lossy())
        .is_some_and(|name| name.starts_with('.') || name.ends_with('~'))
}

fn print_artifacts(set: &ArtifactSet, cwd: &Path, mode: &str) {
    println!("{} modules bundled ({mode})", set.modules.len());
    let out = display_path(&set.out_dir, cwd);
    for artifact in &set.artifacts {
        println!("  {out}/{:<24} {:>9}", artifact.name, format_size(artifact.size));
    }
    println!("built in {}ms", set.duration_ms);
}

fn print_error(err: &BuildError) {
    eprintln!("error: {}: {}", err.code, err.message);
    if let Some(path) = &err.path {
        eprintln!("  --> {path}");
    }
}

fn display_path(path: &Path, cwd: &Path) -> String {
    path.strip_prefix(cwd)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        format!("{:.2} kB", bytes as f64 / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::resolve_defaults;

    #[test]
    fn test_should_ignore() {
        assert!(should_ignore(Path::new("/p/node_modules/htmx.org/dist/htmx.js")));
        assert!(should_ignore(Path::new("/p/.git/index")));
        assert!(should_ignore(Path::new("/p/internal/ts-client/.client.ts.swp")));
        assert!(should_ignore(Path::new("/p/internal/ts-client/client.ts~")));
        assert!(!should_ignore(Path::new("/p/internal/ts-client/client.ts")));
    }

    #[test]
    fn test_is_relevant() {
        let config = resolve_defaults(BuildMode::Development, Path::new("/p")).unwrap();
        let build = &config.build;

        assert!(is_relevant(&build.root.join("client.ts"), build));
        assert!(is_relevant(&build.root.join("tailwind.css"), build));
        assert!(!is_relevant(&build.root.join("README.md"), build));
        assert!(!is_relevant(&build.out_dir.join("client.js"), build));
    }

    #[test]
    fn test_source_dist_dir_is_watched() {
        let mut config = resolve_defaults(BuildMode::Development, Path::new("/p")).unwrap();
        config.build.out_dir = PathBuf::from("/p/build");
        let build = &config.build;

        assert!(is_relevant(&build.root.join("dist/format.ts"), build));
        assert!(is_relevant(Path::new("/p/src/dist/x.ts"), build));
        assert!(!is_relevant(Path::new("/p/build/client.js"), build));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 kB");
    }
}
