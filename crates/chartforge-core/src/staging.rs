//! Staging directory naming and creation
//!
//! Every chartification run gets a deterministic, content-addressed staging
//! directory: the same (release, source, options) triple always lands in the
//! same place, so reruns reuse their location and concurrent runs for
//! different inputs never collide.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::options::ChartifyOptions;

/// Environment variable redirecting where staging directories are created
pub const ENV_WORK_DIR: &str = "CHARTFORGE_TEMPDIR";

/// Environment variable enabling the human-readable input dump written
/// beside each staging directory
pub const ENV_DEBUG: &str = "CHARTFORGE_DEBUG";

/// Length of the hash suffix in a derived staging ID
const ID_HASH_LEN: usize = 10;

/// Derive the deterministic staging identifier for a run
///
/// The ID is `[namespace-]release-<hash>` where the hash covers the release,
/// the source reference, and the full option set rendered through a
/// canonical encoding with sorted map keys, so option reordering never
/// changes the result.
pub fn generate_id(release: &str, source: &str, opts: &ChartifyOptions) -> Result<String> {
    let mut parts = Vec::with_capacity(3);

    if !opts.namespace.is_empty() {
        parts.push(opts.namespace.clone());
    }
    parts.push(release.to_string());
    parts.push(hash_object(&(release, source, opts))?);

    Ok(parts.join("-"))
}

/// Hash an arbitrary serializable value into a short stable hex string
///
/// The value is converted to a JSON tree first; the tree's maps are
/// key-sorted, which makes the encoding independent of field ordering.
pub fn hash_object<T: Serialize>(obj: &T) -> Result<String> {
    let canonical = serde_json::to_value(obj)?;
    let encoded = serde_json::to_vec(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    let digest = hex::encode(hasher.finalize());

    Ok(digest[..ID_HASH_LEN].to_string())
}

/// Resolve the work root under which staging directories live
///
/// `override_root` wins, then the dedicated environment variable, then a
/// fixed subdirectory of the system temp dir (fixed so that a rerun of the
/// same inputs naturally reuses its staging location).
pub fn work_root(override_root: Option<&Path>) -> PathBuf {
    if let Some(root) = override_root {
        return root.to_path_buf();
    }
    if let Ok(root) = std::env::var(ENV_WORK_DIR) {
        if !root.is_empty() {
            let root = PathBuf::from(root);
            if root.is_absolute() {
                return root;
            }
            if let Ok(abs) = std::fs::canonicalize(&root) {
                return abs;
            }
            return root;
        }
    }
    std::env::temp_dir().join("chartforge")
}

/// Create (if needed) and return the staging directory for a run
///
/// When the debug environment variable is set, a `<dir>.json` dump of the
/// inputs is persisted alongside for post-mortem inspection. Any filesystem
/// error here is fatal to the whole pipeline.
pub fn make_staging_dir(
    release: &str,
    source: &str,
    opts: &ChartifyOptions,
    override_root: Option<&Path>,
) -> Result<PathBuf> {
    let id = match &opts.id {
        Some(id) if !id.is_empty() => id.replace('/', std::path::MAIN_SEPARATOR_STR),
        _ => generate_id(release, source, opts)?,
    };

    let root = work_root(override_root);
    let dir = root.join(id);

    if std::env::var(ENV_DEBUG).map(|v| !v.is_empty()).unwrap_or(false) {
        let dump = serde_json::json!({
            "release": release,
            "source": source,
            "options": opts,
        });
        let dump_path = PathBuf::from(format!("{}.json", dir.display()));
        if let Some(parent) = dump_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::path_io(parent, e))?;
        }
        std::fs::write(&dump_path, serde_json::to_vec_pretty(&dump)?)
            .map_err(|e| Error::path_io(&dump_path, e))?;
    }

    std::fs::create_dir_all(&dir).map_err(|e| Error::path_io(&dir, e))?;

    Ok(dir)
}
