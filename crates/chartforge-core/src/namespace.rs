//! Namespace rewriting
//!
//! Fills in `metadata.namespace` across every document in every content
//! bucket. Explicit namespaces are authoritative and never overridden;
//! documents without a `metadata` mapping (template fragments, scalar
//! documents) are skipped.

use serde::Deserialize;
use std::path::Path;
use walkdir::WalkDir;

use crate::chart::CONTENT_DIRS;
use crate::error::{Error, Result};
use crate::fsutil;

/// Set the namespace on every resource document under the chart's content
/// buckets that does not already declare one
pub fn set_namespace(chart_dir: &Path, namespace: &str) -> Result<()> {
    for bucket in CONTENT_DIRS {
        let dir = chart_dir.join(bucket);
        if !fsutil::exists(&dir) {
            continue;
        }

        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_yaml = matches!(
                entry.path().extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if !is_yaml {
                continue;
            }
            rewrite_file(entry.path(), namespace)?;
        }
    }

    Ok(())
}

fn rewrite_file(path: &Path, namespace: &str) -> Result<()> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::path_io(path, e))?;

    let mut docs: Vec<serde_yaml::Value> = Vec::new();
    for de in serde_yaml::Deserializer::from_str(&content) {
        let doc = serde_yaml::Value::deserialize(de).map_err(|e| Error::YamlFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        docs.push(doc);
    }

    let mut changed = false;

    for doc in &mut docs {
        let Some(mapping) = doc.as_mapping_mut() else {
            continue;
        };
        let Some(metadata) = mapping.get_mut("metadata").and_then(|m| m.as_mapping_mut()) else {
            continue;
        };
        if !metadata.contains_key("namespace") {
            metadata.insert(
                serde_yaml::Value::from("namespace"),
                serde_yaml::Value::from(namespace),
            );
            changed = true;
        }
    }

    if !changed {
        return Ok(());
    }

    let mut out = String::new();
    for (i, doc) in docs.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(doc)?);
    }

    std::fs::write(path, out).map_err(|e| Error::path_io(path, e))?;

    Ok(())
}
