//! Double-render guard
//!
//! Rendered payloads may embed syntax that looks like template calls (e.g.
//! alerting-rule expressions). Re-templating the chart must treat them as
//! opaque data, so the real content moves under the auxiliary `files/`
//! bucket, which the templating engine never scans for template syntax,
//! and each original location gets a stub that reads the payload back as
//! raw bytes.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chart::CONTENT_DIRS;
use crate::error::{Error, Result};
use crate::fsutil;

/// Create (if needed) and return the auxiliary files directory
pub fn ensure_files_dir(chart_dir: &Path) -> Result<PathBuf> {
    let files_dir = chart_dir.join("files");
    std::fs::create_dir_all(&files_dir).map_err(|e| Error::path_io(&files_dir, e))?;
    Ok(files_dir)
}

/// Relocate rendered content out of the live template directories and
/// replace it with indirection stubs
///
/// The CRD bucket is left alone: the templating engine renders `crds/`
/// verbatim, without template processing, so wrapping would corrupt it.
/// Exploded sub-charts are re-attached under `templates/charts/` so later
/// tooling does not stumble over sub-chart directories lacking their own
/// metadata.
pub fn prevent_double_rendering(chart_dir: &Path, files_dir: &Path) -> Result<()> {
    for d in CONTENT_DIRS {
        if d == "crds" {
            continue;
        }

        let src_dir = chart_dir.join(d);
        let dst_dir = files_dir.join(d);

        if !fsutil::exists(&src_dir) {
            continue;
        }
        // A previous guard pass may have parked content here already; the
        // current bucket supersedes it.
        if fsutil::exists(&dst_dir) {
            std::fs::remove_dir_all(&dst_dir).map_err(|e| Error::path_io(&dst_dir, e))?;
        }
        std::fs::rename(&src_dir, &dst_dir).map_err(|e| Error::path_io(&dst_dir, e))?;

        for entry in WalkDir::new(&dst_dir) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(files_dir)
                .expect("walk stays under the files dir");
            let rel_str = rel.to_string_lossy().replace('\\', "/");

            let stub = format!("{{{{ .Files.Get \"files/{rel_str}\" }}}}");
            let stub_path = chart_dir.join(rel);

            fsutil::create_dir_for_file(&stub_path)?;
            std::fs::write(&stub_path, stub).map_err(|e| Error::path_io(&stub_path, e))?;
        }

        if d == "charts" {
            let charts_dir = chart_dir.join("charts");
            let templates_dir = chart_dir.join("templates");
            let template_charts_dir = templates_dir.join("charts");

            // The original chart may legitimately lack a templates directory
            std::fs::create_dir_all(&templates_dir)
                .map_err(|e| Error::path_io(&templates_dir, e))?;

            std::fs::rename(&charts_dir, &template_charts_dir)
                .map_err(|e| Error::path_io(&template_charts_dir, e))?;
        }
    }

    Ok(())
}
