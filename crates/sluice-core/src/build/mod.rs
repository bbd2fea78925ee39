//! Build path: bundle the entry module into library artifacts and commit
//! them to the output directory.
//!
//! A build either replaces the output directory wholesale or leaves it as it
//! was. Artifacts are written to a staging sibling first
//! ([`sluice_util::fs::StagedDir`]) and swapped into place only after every
//! write succeeded.

pub mod codes;

use crate::bundler::{BundleError, BundleOptions, Bundler, EmitOptions, Resolver};
use crate::config::{BuildConfiguration, LibFormat};
use serde::Serialize;
use sluice_util::fs::{atomic_write, list_files, StagedDir};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Build failure with a stable code.
#[derive(Debug, Error)]
#[error("{code}: {message}{}", .path.as_ref().map(|p| format!(" ({p})")).unwrap_or_default())]
pub struct BuildError {
    pub code: &'static str,
    pub message: String,
    pub path: Option<String>,
}

impl BuildError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl From<BundleError> for BuildError {
    fn from(err: BundleError) -> Self {
        Self {
            code: err.code,
            message: err.message,
            path: err.path,
        }
    }
}

/// What an artifact contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Script,
    Style,
    Sourcemap,
}

/// One written file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// File name inside the output directory.
    pub name: String,
    pub kind: ArtifactKind,
    /// Library format, for scripts and their maps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LibFormat>,
    /// Size in bytes.
    pub size: u64,
}

/// The result of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSet {
    pub out_dir: PathBuf,
    pub artifacts: Vec<Artifact>,
    /// Bundled modules, in emission order.
    pub modules: Vec<PathBuf>,
    pub duration_ms: u64,
}

impl ArtifactSet {
    /// Look up an artifact by file name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}

/// An artifact in memory, before commit.
struct Pending {
    artifact: Artifact,
    contents: String,
}

impl Pending {
    fn new(name: String, kind: ArtifactKind, format: Option<LibFormat>, contents: String) -> Self {
        Self {
            artifact: Artifact {
                name,
                kind,
                format,
                size: contents.len() as u64,
            },
            contents,
        }
    }
}

/// Bundle `config.entry` and write the artifact set to `config.out_dir`.
///
/// A compile or resolve failure returns before the output directory is
/// touched; a write failure leaves the previous contents in place.
pub fn build(config: &BuildConfiguration) -> Result<ArtifactSet, BuildError> {
    let start = Instant::now();
    check_out_dir(config)?;

    let bundler = Bundler::new(Resolver::new(&config.root, config.alias.clone()));
    let options = BundleOptions {
        minify: config.minify,
        sourcemap: config.sourcemap,
    };
    let result = bundler.bundle(&config.entry_path(), &options)?;

    let mut pending = Vec::new();
    for &format in &config.lib.formats {
        let file = format.file_name(&config.lib.file_name);
        let output = result.emit(&EmitOptions {
            format,
            name: &config.lib.name,
            file: &file,
            minify: config.minify,
            sourcemap: config.sourcemap,
            out_dir: &config.out_dir,
        })?;
        debug!(format = %format, file = %file, bytes = output.code.len(), "emitted artifact");

        if let Some(map) = output.map {
            pending.push(Pending::new(
                format!("{file}.map"),
                ArtifactKind::Sourcemap,
                Some(format),
                map,
            ));
        }
        pending.push(Pending::new(file, ArtifactKind::Script, Some(format), output.code));
    }

    if let Some(css) = &result.css {
        pending.push(Pending::new(
            format!("{}.css", config.lib.file_name),
            ArtifactKind::Style,
            None,
            css.clone(),
        ));
    }
    pending.sort_by(|a, b| a.artifact.name.cmp(&b.artifact.name));

    commit(config, &pending)?;

    let set = ArtifactSet {
        out_dir: config.out_dir.clone(),
        artifacts: pending.into_iter().map(|p| p.artifact).collect(),
        modules: result.modules(),
        duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    info!(
        out_dir = %set.out_dir.display(),
        artifacts = set.artifacts.len(),
        modules = set.modules.len(),
        duration_ms = set.duration_ms,
        "build complete"
    );

    Ok(set)
}

/// Refuse output directories that would swallow the sources on swap.
fn check_out_dir(config: &BuildConfiguration) -> Result<(), BuildError> {
    if config.root.starts_with(&config.out_dir) {
        return Err(BuildError::new(
            codes::BUILD_OUTPUT_ERROR,
            "output directory must not contain the source root",
        )
        .with_path(config.out_dir.display().to_string()));
    }
    Ok(())
}

fn commit(config: &BuildConfiguration, pending: &[Pending]) -> Result<(), BuildError> {
    let out_dir = &config.out_dir;
    let output_error = |e: std::io::Error, path: &Path| {
        BuildError::new(codes::BUILD_OUTPUT_ERROR, e.to_string()).with_path(path.display().to_string())
    };

    if config.empty_out_dir {
        let staged = StagedDir::new(out_dir).map_err(|e| output_error(e, out_dir))?;
        for p in pending {
            staged
                .write(Path::new(&p.artifact.name), p.contents.as_bytes())
                .map_err(|e| output_error(e, &out_dir.join(&p.artifact.name)))?;
        }
        staged.commit().map_err(|e| output_error(e, out_dir))?;
    } else {
        std::fs::create_dir_all(out_dir).map_err(|e| output_error(e, out_dir))?;
        for p in pending {
            let path = out_dir.join(&p.artifact.name);
            atomic_write(&path, p.contents.as_bytes()).map_err(|e| output_error(e, &path))?;
        }

        let leftover = list_files(out_dir)
            .map_err(|e| output_error(e, out_dir))?
            .into_iter()
            .filter(|f| !pending.iter().any(|p| f == Path::new(&p.artifact.name)))
            .count();
        if leftover > 0 {
            debug!(out_dir = %out_dir.display(), leftover, "kept files not produced by this build");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibConfig;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    fn config(dir: &Path) -> BuildConfiguration {
        BuildConfiguration {
            root: dir.join("src"),
            entry: PathBuf::from("client.ts"),
            lib: LibConfig {
                name: "client".to_string(),
                file_name: "client".to_string(),
                formats: vec![LibFormat::Es, LibFormat::Umd],
            },
            out_dir: dir.join("build"),
            minify: false,
            sourcemap: false,
            alias: BTreeMap::new(),
            empty_out_dir: true,
        }
    }

    fn write_client(dir: &Path) {
        let src = dir.join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("client.ts"), "import './style.css';\nexport const x: number = 1;\n").unwrap();
        fs::write(src.join("style.css"), ".a { color: red; }\n").unwrap();
    }

    #[test]
    fn test_build_writes_artifacts() {
        let dir = tempdir().unwrap();
        write_client(dir.path());

        let set = build(&config(dir.path())).unwrap();
        let names: Vec<&str> = set.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["client.css", "client.js", "client.umd.cjs"]);
        assert_eq!(set.get("client.css").unwrap().kind, ArtifactKind::Style);
        assert_eq!(set.get("client.js").unwrap().format, Some(LibFormat::Es));

        let es = fs::read_to_string(dir.path().join("build/client.js")).unwrap();
        assert_eq!(es.len() as u64, set.get("client.js").unwrap().size);
        assert!(es.contains("export { __x0 as x };"));
    }

    #[test]
    fn test_production_build_has_maps() {
        let dir = tempdir().unwrap();
        write_client(dir.path());
        let mut cfg = config(dir.path());
        cfg.minify = true;
        cfg.sourcemap = true;

        let set = build(&cfg).unwrap();
        assert!(set.get("client.js.map").is_some());
        assert!(set.get("client.umd.cjs.map").is_some());

        let es = fs::read_to_string(dir.path().join("build/client.js")).unwrap();
        assert!(es.ends_with("//# sourceMappingURL=client.js.map\n"));
        let css = fs::read_to_string(dir.path().join("build/client.css")).unwrap();
        assert!(!css.contains('\n'));

        let map: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("build/client.js.map")).unwrap())
                .unwrap();
        let source = map["sources"][0].as_str().unwrap();
        assert!(source.ends_with("src/client.ts"), "{source}");
    }

    #[test]
    fn test_keeps_existing_files_without_empty_out_dir() {
        let dir = tempdir().unwrap();
        write_client(dir.path());
        fs::create_dir_all(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("build/keep.txt"), "keep").unwrap();

        let mut cfg = config(dir.path());
        cfg.empty_out_dir = false;
        build(&cfg).unwrap();

        assert!(dir.path().join("build/keep.txt").exists());
        assert!(dir.path().join("build/client.js").exists());
    }

    #[test]
    fn test_out_dir_containing_root_is_rejected() {
        let dir = tempdir().unwrap();
        write_client(dir.path());
        let mut cfg = config(dir.path());
        cfg.out_dir = dir.path().to_path_buf();

        let err = build(&cfg).unwrap_err();
        assert_eq!(err.code, codes::BUILD_OUTPUT_ERROR);
        assert!(dir.path().join("src/client.ts").exists());
    }

    #[test]
    fn test_error_display() {
        let err = BuildError::new(codes::BUILD_CSS_ERROR, "bad css").with_path("a.css");
        assert_eq!(err.to_string(), "BUILD_CSS_ERROR: bad css (a.css)");
        let err = BuildError::new(codes::BUILD_OUTPUT_ERROR, "disk full");
        assert_eq!(err.to_string(), "BUILD_OUTPUT_ERROR: disk full");
    }
}
