use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// The file will either have the old contents or the new contents, never a
/// partial write.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = sibling_path(path, "tmp");

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // On Windows, rename can fail if target exists. Try copy + remove as fallback.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Build a hidden sibling path for `path`: `.{name}.{tag}.{pid}` in the same parent.
///
/// Keeping the sibling in the same directory keeps renames on one filesystem.
#[must_use]
pub fn sibling_path(path: &Path, tag: &str) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    parent.join(format!(".{name}.{tag}.{}", std::process::id()))
}

/// A directory populated off to the side and then swapped into place.
///
/// Files are written into a hidden sibling of the target. [`StagedDir::commit`]
/// replaces the target with the staged contents; dropping an uncommitted
/// `StagedDir` removes the staging directory and leaves the target untouched.
#[derive(Debug)]
pub struct StagedDir {
    target: PathBuf,
    staging: PathBuf,
    committed: bool,
}

impl StagedDir {
    /// Create an empty staging directory next to `target`.
    ///
    /// # Errors
    /// Returns an error if `target` exists and is not a directory, or if the
    /// staging directory cannot be created.
    pub fn new(target: &Path) -> io::Result<Self> {
        if target.exists() && !target.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} exists and is not a directory", target.display()),
            ));
        }

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let staging = sibling_path(target, "staging");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir(&staging)?;

        Ok(Self {
            target: target.to_path_buf(),
            staging,
            committed: false,
        })
    }

    /// Path of the staging directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.staging
    }

    /// Path the staged contents will be committed to.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Write a file into the staging directory.
    ///
    /// `relative` may contain subdirectories; they are created as needed.
    ///
    /// # Errors
    /// Returns an error if `relative` escapes the staging directory or the
    /// write fails.
    pub fn write(&self, relative: &Path, bytes: &[u8]) -> io::Result<()> {
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a relative path inside the output directory", relative.display()),
            ));
        }

        let path = self.staging.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }

    /// Replace the target directory with the staged contents.
    ///
    /// The previous target (if any) is moved aside first and restored if the
    /// final rename fails, so the target is never left half-written.
    ///
    /// # Errors
    /// Returns an error if either rename fails.
    pub fn commit(mut self) -> io::Result<()> {
        if self.target.exists() {
            let backup = sibling_path(&self.target, "old");
            if backup.exists() {
                fs::remove_dir_all(&backup)?;
            }
            fs::rename(&self.target, &backup)?;

            if let Err(e) = fs::rename(&self.staging, &self.target) {
                let _ = fs::rename(&backup, &self.target);
                return Err(e);
            }

            // The swap already happened; a leftover backup is only clutter.
            let _ = fs::remove_dir_all(&backup);
        } else {
            fs::rename(&self.staging, &self.target)?;
        }

        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedDir {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}

/// List every file below `dir`, as sorted paths relative to `dir`.
///
/// A missing directory yields an empty list.
///
/// # Errors
/// Returns an error if the directory cannot be walked.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            if let Ok(rel) = entry.path().strip_prefix(dir) {
                files.push(rel.to_path_buf());
            }
        }
    }
    Ok(files)
}

/// Lexically normalize a path: drop `.` components and resolve `..` against
/// preceding components without touching the filesystem.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    Some(Component::RootDir | Component::Prefix(_)) => true,
                    _ => false,
                };
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Relative path from the directory `from_dir` to `to`, using `/` separators.
///
/// Both paths are normalized first. Used for sourcemap `sources` entries.
#[must_use]
pub fn relative_path(from_dir: &Path, to: &Path) -> String {
    let from = normalize(from_dir);
    let to = normalize(to);
    let from_parts: Vec<_> = from.components().collect();
    let to_parts: Vec<_> = to.components().collect();

    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for c in &from_parts[common..] {
        if !matches!(c, Component::CurDir) {
            parts.push("..".to_string());
        }
    }
    for c in &to_parts[common..] {
        parts.push(c.as_os_str().to_string_lossy().into_owned());
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");

        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");

        // Overwrite
        atomic_write(&path, b"world").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "world");
    }

    #[test]
    fn test_atomic_write_no_temp_left_on_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");

        atomic_write(&path, b"content").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].as_ref().unwrap().file_name().to_str().unwrap(),
            "test.txt"
        );
    }

    #[test]
    fn test_staged_commit_replaces_previous_contents() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("build");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("stale.txt"), "old").unwrap();

        let staged = StagedDir::new(&target).unwrap();
        staged.write(Path::new("client.js"), b"new").unwrap();
        staged.commit().unwrap();

        assert_eq!(list_files(&target).unwrap(), vec![PathBuf::from("client.js")]);
        // Only the target remains in the parent: no staging or backup dirs.
        let siblings: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(siblings.len(), 1);
    }

    #[test]
    fn test_staged_commit_creates_missing_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("build");

        let staged = StagedDir::new(&target).unwrap();
        staged.write(Path::new("assets/app.css"), b"a{}").unwrap();
        staged.commit().unwrap();

        assert_eq!(
            fs::read_to_string(target.join("assets/app.css")).unwrap(),
            "a{}"
        );
    }

    #[test]
    fn test_staged_drop_leaves_target_untouched() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("build");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), "keep").unwrap();

        {
            let staged = StagedDir::new(&target).unwrap();
            staged.write(Path::new("client.js"), b"partial").unwrap();
            assert!(staged.path().exists());
        }

        assert_eq!(list_files(&target).unwrap(), vec![PathBuf::from("keep.txt")]);
        let siblings: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(siblings.len(), 1);
    }

    #[test]
    fn test_staged_write_rejects_escaping_paths() {
        let dir = tempdir().unwrap();
        let staged = StagedDir::new(&dir.path().join("build")).unwrap();
        assert!(staged.write(Path::new("../evil.js"), b"x").is_err());
    }

    #[test]
    fn test_staged_rejects_file_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("build");
        fs::write(&target, "not a dir").unwrap();
        assert!(StagedDir::new(&target).is_err());
    }

    #[test]
    fn test_list_files_missing_dir() {
        let dir = tempdir().unwrap();
        assert!(list_files(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/p/static/build"), Path::new("/p/ts-client/client.ts")),
            "../../ts-client/client.ts"
        );
        assert_eq!(
            relative_path(Path::new("/p/out"), Path::new("/p/out/a.js")),
            "a.js"
        );
        assert_eq!(relative_path(Path::new("/p"), Path::new("/p")), ".");
    }
}
