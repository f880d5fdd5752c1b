//! Patch application
//!
//! Builds a synthetic overlay descriptor over the rendered files, applies
//! JSON-Patch and strategic-merge patches through the overlay-build engine,
//! then splits the combined output stream back into regular resources and
//! CRDs, preserving each CRD's original directory provenance.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chart::{CONTENT_DIRS, HelmMode};
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, run_captured};
use crate::fsutil;
use crate::options::{Patch, PatchTarget};
use crate::render;

/// Name of the combined overlay-build output inside the staging chart
const PATCHED_FILE: &str = "all.patched.yaml";

/// The synthetic overlay descriptor handed to the overlay-build engine
///
/// Built as a typed tree and serialized once; nothing in the pipeline
/// assembles descriptor YAML by string concatenation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
    pub api_version: String,
    pub kind: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<KustomizationPatch>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<String>,
}

impl Default for Kustomization {
    fn default() -> Self {
        Self {
            api_version: "kustomize.config.k8s.io/v1beta1".to_string(),
            kind: "Kustomization".to_string(),
            resources: Vec::new(),
            patches: Vec::new(),
            transformers: Vec::new(),
        }
    }
}

/// One overlay-patch entry of the synthetic descriptor
#[derive(Debug, Clone, Serialize)]
pub struct KustomizationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<PatchTarget>,

    pub path: String,
}

/// A JSON-Patch spec file: a typed target plus either inline operations or
/// a path to them
#[derive(Debug, Clone, Default, Deserialize)]
struct JsonPatchFile {
    #[serde(default)]
    target: Option<PatchTarget>,

    #[serde(default)]
    patch: Option<serde_yaml::Value>,

    #[serde(default)]
    path: Option<String>,
}

/// Patch-stage options
#[derive(Debug, Clone, Default)]
pub struct PatchOpts {
    pub json_patches: Vec<PathBuf>,
    pub strategic_merge_patches: Vec<PathBuf>,
    pub patches: Vec<Patch>,
    pub transformers: Vec<PathBuf>,
    pub enable_alpha_plugins: bool,
}

impl PatchOpts {
    pub fn is_empty(&self) -> bool {
        self.json_patches.is_empty()
            && self.strategic_merge_patches.is_empty()
            && self.patches.is_empty()
            && self.transformers.is_empty()
    }
}

/// Outcome of a patch run
#[derive(Debug, Clone, Default)]
pub struct PatchSummary {
    pub resource_count: usize,
    pub crd_count: usize,
    /// Final locations of the relocated streams
    pub written_files: Vec<PathBuf>,
}

/// Apply the requested patches to the rendered files and split the result
/// into the templates and CRD buckets
///
/// Returns the resource/CRD counts and the files the two streams were
/// relocated to.
pub fn apply_patches(
    runner: &dyn CommandRunner,
    kustomize_bin: &str,
    helm_mode: HelmMode,
    chart_dir: &Path,
    generated_files: &[PathBuf],
    opts: &PatchOpts,
) -> Result<PatchSummary> {
    // Reject malformed specs before any file I/O
    for (i, patch) in opts.patches.iter().enumerate() {
        patch.validate(i)?;
    }

    tracing::debug!("patching files: {generated_files:?}");

    let mut kustomization = Kustomization::default();

    let mut crds_from_templates = false;
    for f in generated_files {
        let rel = f.strip_prefix(chart_dir).unwrap_or(f);
        let rel = rel.to_string_lossy().replace('\\', "/");
        if rel.starts_with("templates/crds/") {
            crds_from_templates = true;
        }
        kustomization.resources.push(rel);
    }

    for (i, f) in opts.json_patches.iter().enumerate() {
        let content = std::fs::read_to_string(f).map_err(|e| Error::path_io(f, e))?;
        let parsed: JsonPatchFile =
            serde_yaml::from_str(&content).map_err(|e| Error::YamlFile {
                path: f.clone(),
                source: e,
            })?;

        let path = if let Some(path) = parsed.path {
            path
        } else if let Some(patch) = parsed.patch {
            let rel = format!("jsonpatches/patch.{i}.yaml");
            write_patch_file(chart_dir, &rel, serde_yaml::to_string(&patch)?.as_bytes())?;
            rel
        } else {
            return Err(Error::JsonPatchFileIncomplete { path: f.clone() });
        };

        kustomization.patches.push(KustomizationPatch {
            target: parsed.target,
            path,
        });
    }

    for (i, patch) in opts.patches.iter().enumerate() {
        let content = match (&patch.path, &patch.patch) {
            (Some(path), None) => std::fs::read_to_string(path).map_err(|e| Error::path_io(path, e))?,
            (None, Some(inline)) => inline.clone(),
            // validate() above rules the other arms out
            _ => unreachable!("patch specs are validated before use"),
        };

        if is_json_patch(&content) {
            if patch.target.is_none() {
                return Err(Error::JsonPatchMissingTarget { index: i });
            }
            let rel = format!("patches/patch.{i}.json.yaml");
            write_patch_file(chart_dir, &rel, content.as_bytes())?;
            kustomization.patches.push(KustomizationPatch {
                target: patch.target.clone(),
                path: rel,
            });
        } else {
            let rel = format!("patches/patch.{i}.strategic.yaml");
            write_patch_file(chart_dir, &rel, content.as_bytes())?;
            kustomization.patches.push(KustomizationPatch {
                target: patch.target.clone(),
                path: rel,
            });
        }
    }

    for (i, f) in opts.strategic_merge_patches.iter().enumerate() {
        let content = std::fs::read(f).map_err(|e| Error::path_io(f, e))?;
        let rel = format!("strategicmergepatches/patch.{i}.yaml");
        write_patch_file(chart_dir, &rel, &content)?;
        kustomization.patches.push(KustomizationPatch {
            target: None,
            path: rel,
        });
    }

    for (i, f) in opts.transformers.iter().enumerate() {
        let content = std::fs::read(f).map_err(|e| Error::path_io(f, e))?;
        let rel = format!("transformers/transformer.{i}.yaml");
        write_patch_file(chart_dir, &rel, &content)?;
        kustomization.transformers.push(rel);
    }

    let descriptor = serde_yaml::to_string(&kustomization)?;
    let descriptor_path = chart_dir.join("kustomization.yaml");
    std::fs::write(&descriptor_path, &descriptor)
        .map_err(|e| Error::path_io(&descriptor_path, e))?;

    tracing::debug!("generated and using kustomization.yaml:\n{descriptor}");

    let rendered_file = chart_dir.join(PATCHED_FILE);
    tracing::debug!("generating {}", rendered_file.display());

    let mut build_args = vec![
        "build".to_string(),
        chart_dir.display().to_string(),
        "--output".to_string(),
        rendered_file.display().to_string(),
    ];
    if opts.enable_alpha_plugins {
        build_args.push(render::kustomize_alpha_plugins_flag(runner, kustomize_bin));
    }

    run_captured(runner, kustomize_bin, &build_args, None)?;

    let combined =
        std::fs::read_to_string(&rendered_file).map_err(|e| Error::path_io(&rendered_file, e))?;

    let mut resources: Vec<String> = Vec::new();
    let mut crds: Vec<String> = Vec::new();

    for doc in split_documents(&combined) {
        if doc.trim().is_empty() {
            continue;
        }
        if is_crd(&doc, &rendered_file)? {
            crds.push(doc);
        } else {
            resources.push(doc);
        }
    }

    tracing::debug!("detected {} resources and {} CRDs", resources.len(), crds.len());

    let resources_file = chart_dir.join("all.patched.resources.yaml");
    let crds_file = chart_dir.join("all.patched.crds.yaml");

    if !resources.is_empty() {
        write_document_stream(&resources_file, &resources)?;
    }
    if !crds.is_empty() {
        write_document_stream(&crds_file, &crds)?;
    }

    // Everything used above would be double-rendered if left behind
    let mut removed: Vec<String> = CONTENT_DIRS.iter().map(|d| d.to_string()).collect();
    removed.extend(
        [
            "strategicmergepatches",
            "patches",
            "jsonpatches",
            "transformers",
            "kustomization.yaml",
            PATCHED_FILE,
        ]
        .map(String::from),
    );
    for name in removed {
        let path = chart_dir.join(name);
        tracing::debug!("removing {}", path.display());
        if path.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|e| Error::path_io(&path, e))?;
        } else if fsutil::exists(&path) {
            std::fs::remove_file(&path).map_err(|e| Error::path_io(&path, e))?;
        }
    }

    let mut written_files = Vec::new();

    if !crds.is_empty() {
        // CRDs that came in under templates/crds/ must go back there; some
        // consumers bind behavior to that exact subpath.
        let crds_dir = if crds_from_templates {
            chart_dir.join("templates").join("crds")
        } else if helm_mode.is_current() {
            chart_dir.join("crds")
        } else {
            chart_dir.join("templates")
        };
        std::fs::create_dir_all(&crds_dir).map_err(|e| Error::path_io(&crds_dir, e))?;
        let dst = crds_dir.join("patched_crds.yaml");
        std::fs::rename(&crds_file, &dst).map_err(|e| Error::path_io(&dst, e))?;
        written_files.push(dst);
    }

    if !resources.is_empty() {
        let templates_dir = chart_dir.join("templates");
        std::fs::create_dir_all(&templates_dir).map_err(|e| Error::path_io(&templates_dir, e))?;
        let dst = templates_dir.join("patched_resources.yaml");
        std::fs::rename(&resources_file, &dst).map_err(|e| Error::path_io(&dst, e))?;
        written_files.push(dst);
    }

    Ok(PatchSummary {
        resource_count: resources.len(),
        crd_count: crds.len(),
        written_files,
    })
}

/// Whether the content is a JSON-Patch document: a sequence whose entries
/// all carry the required `op` and `path` fields
fn is_json_patch(content: &str) -> bool {
    let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(content) else {
        return false;
    };
    let Some(ops) = value.as_sequence() else {
        return false;
    };
    !ops.is_empty()
        && ops.iter().all(|op| {
            op.as_mapping()
                .map(|m| m.contains_key("op") && m.contains_key("path"))
                .unwrap_or(false)
        })
}

fn is_crd(doc: &str, rendered_file: &Path) -> Result<bool> {
    #[derive(Deserialize)]
    struct KindProbe {
        #[serde(default)]
        kind: Option<String>,
    }

    let probe: KindProbe = serde_yaml::from_str(doc).map_err(|e| Error::YamlFile {
        path: rendered_file.to_path_buf(),
        source: e,
    })?;

    Ok(probe.kind.as_deref() == Some("CustomResourceDefinition"))
}

/// Split a combined multi-document stream on `\n---\n` separators
///
/// The scanner is sized to the whole input and never truncates a document;
/// a stream holding exactly one document with no separator still yields
/// that document.
pub fn split_documents(combined: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut rest = combined;

    while let Some(i) = rest.find("\n---\n") {
        docs.push(rest[..i + 1].to_string());
        rest = &rest[i + 5..];
    }

    if !rest.trim().is_empty() {
        docs.push(rest.to_string());
    }

    docs
}

fn write_patch_file(chart_dir: &Path, rel: &str, content: &[u8]) -> Result<()> {
    let abs = chart_dir.join(rel);
    fsutil::create_dir_for_file(&abs)?;
    tracing::debug!("{rel}:\n{}", String::from_utf8_lossy(content));
    std::fs::write(&abs, content).map_err(|e| Error::path_io(&abs, e))?;
    Ok(())
}

fn write_document_stream(path: &Path, docs: &[String]) -> Result<()> {
    let mut out = String::new();
    for doc in docs {
        out.push_str(doc);
        if !doc.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("---\n");
    }
    std::fs::write(path, out).map_err(|e| Error::path_io(path, e))?;
    Ok(())
}
