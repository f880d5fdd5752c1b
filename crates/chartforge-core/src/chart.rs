//! Chart metadata and dependency declarations
//!
//! Two packaging-manifest generations are supported: the legacy generation
//! keeps dependencies in a separate `requirements.yaml`, the current
//! generation keeps them inline in `Chart.yaml`. [`HelmMode`] records which
//! generation a run targets; it is computed once per run and passed down.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// The fixed semantic content buckets of a staging chart
pub const CONTENT_DIRS: [&str; 3] = ["templates", "charts", "crds"];

/// Which templating-engine generation the run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelmMode {
    /// Legacy generation: dependencies live in `requirements.yaml`,
    /// `helm template` takes the release via `--name`
    Helm2,
    /// Current generation (v3 and later): dependencies live inline in
    /// `Chart.yaml`, CRDs have a dedicated `crds/` bucket
    Helm3,
}

impl HelmMode {
    /// Whether this is the current (inline-dependencies) generation
    pub fn is_current(self) -> bool {
        matches!(self, Self::Helm3)
    }
}

/// A single chart dependency declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Mapping of source values to parent keys to be imported. Each item is
    /// either a string or a child/parent pair.
    #[serde(
        rename = "import-values",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub import_values: Vec<serde_yaml::Value>,
}

impl Dependency {
    /// The name the dependency is addressed by in values: alias if set,
    /// otherwise the chart name
    pub fn effective_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }
}

/// The legacy-generation requirements document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

impl Requirements {
    /// Load `requirements.yaml` from a chart directory, if present
    pub fn load(chart_dir: &Path) -> Result<Option<Self>> {
        load_optional_yaml(&chart_dir.join("requirements.yaml"))
    }
}

/// Chart metadata as persisted in `Chart.yaml`
///
/// Only the dependency list is modeled; every other field passes through
/// untouched so a rewrite never drops metadata the pipeline does not know
/// about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,

    #[serde(flatten)]
    pub rest: serde_yaml::Mapping,
}

impl ChartMeta {
    /// Load `Chart.yaml` from a chart directory, if present
    pub fn load(chart_dir: &Path) -> Result<Option<Self>> {
        load_optional_yaml(&chart_dir.join("Chart.yaml"))
    }

    /// Write this metadata back to `Chart.yaml` under `chart_dir`
    pub fn save(&self, chart_dir: &Path) -> Result<()> {
        let path = chart_dir.join("Chart.yaml");
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|e| Error::path_io(&path, e))?;
        Ok(())
    }

    /// The chart name recorded in the metadata, if any
    pub fn name(&self) -> Option<&str> {
        self.rest.get("name").and_then(|v| v.as_str())
    }
}

fn load_optional_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::path_io(path, e)),
    };
    let parsed = serde_yaml::from_str(&content).map_err(|e| Error::YamlFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_meta_passthrough_roundtrip() {
        let input = "apiVersion: v2\nname: myapp\nversion: 1.2.3\nicon: https://example.com/i.png\ndependencies:\n- name: db\n  repository: https://charts.example.com\n  version: 1.0.0\n";
        let meta: ChartMeta = serde_yaml::from_str(input).unwrap();

        assert_eq!(meta.dependencies.len(), 1);
        assert_eq!(meta.dependencies[0].name, "db");
        assert_eq!(meta.name(), Some("myapp"));

        let out = serde_yaml::to_string(&meta).unwrap();
        assert!(out.contains("icon: https://example.com/i.png"));
        assert!(out.contains("version: 1.2.3"));
    }

    #[test]
    fn test_dependency_effective_name() {
        let mut dep = Dependency {
            name: "db".to_string(),
            ..Default::default()
        };
        assert_eq!(dep.effective_name(), "db");
        dep.alias = "primary".to_string();
        assert_eq!(dep.effective_name(), "primary");
    }

    #[test]
    fn test_requirements_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Requirements::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_import_values_passthrough() {
        let input = "dependencies:\n- name: db\n  import-values:\n  - data\n  - child: a\n    parent: b\n";
        let reqs: Requirements = serde_yaml::from_str(input).unwrap();
        assert_eq!(reqs.dependencies[0].import_values.len(), 2);

        let out = serde_yaml::to_string(&reqs).unwrap();
        assert!(out.contains("import-values:"));
    }
}
