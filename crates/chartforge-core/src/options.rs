//! Chartification options
//!
//! A plain configuration struct with a validation pass run before any file
//! I/O. The full option set participates in the staging-ID hash, so every
//! field is serializable.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::inject;

/// An ad hoc chart dependency declared at chartification time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdhocDependency {
    /// Alias under which the dependency chart is addressed in values
    #[serde(default)]
    pub alias: String,
    /// Chart reference: a local path or `repo/chart`
    pub chart: String,
    /// Version constraint; `*` matches any version
    #[serde(default)]
    pub version: String,
}

impl AdhocDependency {
    /// Parse the deprecated compact form `alias=repoOrPath/chart:version`
    ///
    /// Alias and version are optional: `repo/chart` alone is accepted and
    /// the version defaults to the `*` wildcard.
    pub fn parse_compact(spec: &str) -> Result<Self> {
        let (alias, rest) = match spec.rsplit_once('=') {
            Some((a, r)) => (a.to_string(), r),
            None => (String::new(), spec),
        };

        let (chart, version) = match rest.split_once(':') {
            Some((c, v)) => (c.to_string(), v.to_string()),
            None => (rest.to_string(), "*".to_string()),
        };

        if chart.is_empty() {
            return Err(Error::InvalidDependency {
                spec: spec.to_string(),
            });
        }

        Ok(Self {
            alias,
            chart,
            version,
        })
    }
}

/// Typed resource selector for a patch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A unified patch specification
///
/// Exactly one of `path` and `patch` must be set. JSON-Patch content (a
/// sequence of `op`/`path` operations) requires a `target`; strategic-merge
/// content is matched by resource identity when no target is given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Path to a file holding the patch document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Inline patch document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PatchTarget>,
}

impl Patch {
    /// Reject specs with both or neither of `path`/`patch` set
    pub fn validate(&self, index: usize) -> Result<()> {
        match (&self.path, &self.patch) {
            (Some(_), Some(_)) => Err(Error::PatchSourceConflict { index }),
            (None, None) => Err(Error::PatchSourceMissing { index }),
            _ => Ok(()),
        }
    }
}

/// The full option set of a chartification run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartifyOptions {
    /// Pass the templating engine's debug flag through
    pub debug: bool,

    /// Chart values files
    pub values_files: Vec<PathBuf>,

    /// Ad hoc values passed as `--set` flags
    pub set_values: Vec<String>,

    /// Default namespace the rendered manifests are associated with
    pub namespace: String,

    /// Version of the chart being rendered; also the synthesized version
    /// for raw-manifest sources when set
    pub chart_version: String,

    /// Application version recorded in synthesized chart metadata
    pub app_version: Option<String>,

    /// Rewrite the namespace of rendered resources that do not declare one
    pub override_namespace: Option<String>,

    /// Ad hoc chart dependencies
    pub adhoc_dependencies: Vec<AdhocDependency>,

    /// Ad hoc dependencies in the deprecated `alias=repoOrPath/chart:version`
    /// compact form
    pub deprecated_adhoc_dependencies: Vec<String>,

    /// JSON-Patch spec files (`target` + `patch`/`path` documents)
    pub json_patches: Vec<PathBuf>,

    /// Strategic-merge patch files
    pub strategic_merge_patches: Vec<PathBuf>,

    /// Unified patch specs with optional typed targets
    pub patches: Vec<Patch>,

    /// Overlay transformer config files
    pub transformers: Vec<PathBuf>,

    /// Injector specs of the form `command,key1=value1[,key2=value2,...]`
    pub injectors: Vec<String>,

    /// Raw injector command templates with a `FILE` placeholder
    pub injects: Vec<String>,

    /// Pass `--include-crds` to the templating engine (current generation
    /// only)
    pub include_crds: bool,

    /// Skip refreshing chart dependencies before rendering
    pub skip_deps: bool,

    /// Pass the overlay-build engine's alpha-plugins flag
    pub enable_kustomize_alpha_plugins: bool,

    /// Use a combined-stdout render instead of the engine's output
    /// directory mode
    pub workaround_output_dir_issue: bool,

    /// Explicit staging-directory identifier, overriding the derived one
    pub id: Option<String>,
}

impl ChartifyOptions {
    /// Validate everything that can be rejected without touching the
    /// filesystem: patch source exclusivity and injector flag shape
    pub fn validate(&self) -> Result<()> {
        for (i, patch) in self.patches.iter().enumerate() {
            patch.validate(i)?;
        }
        for injector in &self.injectors {
            inject::parse_injector(injector)?;
        }
        for spec in &self.deprecated_adhoc_dependencies {
            AdhocDependency::parse_compact(spec)?;
        }
        Ok(())
    }
}
