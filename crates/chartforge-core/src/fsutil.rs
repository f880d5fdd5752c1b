//! Filesystem helpers shared across pipeline stages

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Whether the given file or directory exists
pub fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Recursively copy `src` into `dst`, creating `dst` if needed
///
/// Relative layout below `src` is preserved. Symlinks are followed.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| Error::path_io(dst, e))?;

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths under its root");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::path_io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::path_io(parent, e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| Error::path_io(&target, e))?;
        }
    }

    Ok(())
}

/// File search filter
#[derive(Debug)]
pub struct SearchFileOpts<'a> {
    /// Directory to search under
    pub base_path: &'a Path,
    /// Only match files whose path contains this sub path component
    pub match_sub_path: Option<&'a str>,
    /// File extensions to match, e.g. `["yaml", "yml"]`
    pub extensions: &'a [&'a str],
}

/// Returns files under the base path that match the sub path and extensions
pub fn search_files(opts: &SearchFileOpts<'_>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(opts.base_path) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(sub) = opts.match_sub_path {
            let needle = format!("{}/", sub);
            if !entry.path().to_string_lossy().contains(&needle) {
                continue;
            }
        }
        let matched = match entry.path().extension().and_then(|e| e.to_str()) {
            Some(ext) => opts.extensions.iter().any(|t| *t == ext),
            None => false,
        };
        if matched {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();

    Ok(files)
}

/// Create the parent directory of `file` if it does not exist yet
pub fn create_dir_for_file(file: &Path) -> Result<()> {
    if let Some(parent) = file.parent() {
        if !exists(parent) {
            std::fs::create_dir_all(parent).map_err(|e| Error::path_io(parent, e))?;
        }
    }
    Ok(())
}

/// Compute the relative path from `from` to `to`
///
/// Both paths must be absolute; `..` segments are emitted for the
/// components of `from` that `to` does not share.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from_components: Vec<_> = from.components().collect();
    let to_components: Vec<_> = to.components().collect();

    let common = from_components
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..from_components.len() {
        result.push("..");
    }
    for component in &to_components[common..] {
        result.push(component);
    }

    if result.as_os_str().is_empty() {
        result.push(".");
    }

    result
}

/// Remove directories under `root` that became empty, bottom-up
///
/// `root` itself is never removed.
pub fn prune_empty_dirs(root: &Path) -> Result<()> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
        .collect();

    // Deepest first so parents see their children already gone
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    for dir in dirs {
        if dir == root {
            continue;
        }
        let is_empty = std::fs::read_dir(&dir)
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if is_empty {
            std::fs::remove_dir(&dir).map_err(|e| Error::path_io(&dir, e))?;
        }
    }

    Ok(())
}
