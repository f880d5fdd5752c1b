//! Chart archive extraction
//!
//! Local `.tgz` chart archives are unpacked in-process. Remote charts are
//! fetched through the templating engine's fetch subcommand instead, which
//! untars on its own; both paths end with the same single-top-entry check.

use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Archive;

use crate::error::{Error, Result};

/// Unpack the archive at `path` under `dir` and return the single top-level
/// directory it contained
///
/// A chart archive always holds exactly one top-level directory named after
/// the chart. Anything else means the archive is not a chart package.
pub fn untar_under_dir(path: &Path, dir: &Path) -> Result<PathBuf> {
    let file = File::open(path).map_err(|e| Error::path_io(path, e))?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    std::fs::create_dir_all(dir).map_err(|e| Error::path_io(dir, e))?;
    archive.unpack(dir)?;

    single_top_entry(dir)
}

/// Expect exactly one entry directly under `dir` and return its path
pub fn single_top_entry(dir: &Path) -> Result<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| Error::path_io(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    if entries.len() != 1 {
        let listing = entries
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        return Err(Error::UnexpectedArchiveLayout {
            count: entries.len().saturating_sub(1),
            dir: dir.to_path_buf(),
            entries: listing,
        });
    }

    Ok(entries.remove(0))
}
