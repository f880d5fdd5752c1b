//! Source normalization
//!
//! Materializes the input (a local chart or manifest directory, a local
//! chart archive, or a remote chart reference) into the staging directory
//! as a canonical chart skeleton. Raw manifest sets get their files
//! relocated into the templates bucket and a synthesized `Chart.yaml`,
//! which is what turns them into a valid chart shell.

use std::path::{Path, PathBuf};

use crate::archive;
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, run_captured};
use crate::fsutil;
use crate::options::ChartifyOptions;

/// What the source reference turned out to be, probed before staging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceProbe {
    /// The reference names an existing local path
    pub is_local: bool,
    /// The local path contains a kustomization descriptor
    pub is_kustomization: bool,
}

/// Probe whether the source is local and whether it is a kustomize project
pub fn probe_source(source: &str) -> SourceProbe {
    let path = Path::new(source);
    let is_local = fsutil::exists(path);
    let is_kustomization = fsutil::exists(&path.join("kustomization.yaml"));
    SourceProbe {
        is_local,
        is_kustomization,
    }
}

/// Materialize the source into the staging directory
///
/// Local directories are copied recursively; a local `.tgz` archive is
/// unpacked; anything else is treated as a remote chart reference and
/// fetched through the templating engine. Returns the effective chart
/// directory, which for fetched/unpacked archives is the single top-level
/// entry the archive contained.
pub fn copy_to_staging(
    runner: &dyn CommandRunner,
    helm_bin: &str,
    source: &str,
    staging_dir: &Path,
    chart_version: &str,
) -> Result<PathBuf> {
    let path = Path::new(source);

    if fsutil::exists(path) {
        if path.is_file() {
            return archive::untar_under_dir(path, staging_dir);
        }
        fsutil::copy_dir(path, staging_dir)?;
        return Ok(staging_dir.to_path_buf());
    }

    fetch_and_untar_under_dir(runner, helm_bin, source, staging_dir, chart_version)
}

/// Fetch a remote chart reference and unpack it under the staging directory
fn fetch_and_untar_under_dir(
    runner: &dyn CommandRunner,
    helm_bin: &str,
    chart: &str,
    staging_dir: &Path,
    chart_version: &str,
) -> Result<PathBuf> {
    let mut args = vec![
        "fetch".to_string(),
        chart.to_string(),
        "--untar".to_string(),
        "-d".to_string(),
        staging_dir.display().to_string(),
    ];
    if !chart_version.is_empty() {
        args.push("--version".to_string());
        args.push(chart_version.to_string());
    }

    run_captured(runner, helm_bin, &args, None)?;

    archive::single_top_entry(staging_dir)
}

/// Create the templates bucket if the chart lacks one
pub fn ensure_templates_dir(chart_dir: &Path) -> Result<PathBuf> {
    let templates_dir = chart_dir.join("templates");
    if !fsutil::exists(&templates_dir) {
        std::fs::create_dir_all(&templates_dir).map_err(|e| Error::path_io(&templates_dir, e))?;
    }
    Ok(templates_dir)
}

/// Relocate every manifest file in a raw-manifest source into the templates
/// bucket, preserving the relative layout, and prune the directories that
/// emptied out
///
/// Returns the new locations under `templates/`.
pub fn relocate_raw_manifests(chart_dir: &Path) -> Result<Vec<PathBuf>> {
    let templates_dir = chart_dir.join("templates");

    let manifests = fsutil::search_files(&fsutil::SearchFileOpts {
        base_path: chart_dir,
        match_sub_path: None,
        extensions: &["yaml", "yml"],
    })?;

    let mut relocated = Vec::with_capacity(manifests.len());

    for abs_path in manifests {
        if abs_path.starts_with(&templates_dir) {
            continue;
        }
        let rel = abs_path
            .strip_prefix(chart_dir)
            .expect("manifest search stays under the chart dir");
        let dst = templates_dir.join(rel);

        fsutil::create_dir_for_file(&dst)?;
        std::fs::rename(&abs_path, &dst).map_err(|e| Error::path_io(&dst, e))?;
        relocated.push(dst);
    }

    fsutil::prune_empty_dirs(chart_dir)?;

    Ok(relocated)
}

/// Synthesize chart metadata for a source that is not already a chart
///
/// Name derives from the source's base name; the version falls back to
/// `1.0.0` when none was requested; appVersion defaults to the chart
/// version.
pub fn synthesize_chart_meta(
    chart_dir: &Path,
    source: &str,
    opts: &ChartifyOptions,
) -> Result<()> {
    let chart_name = Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string());

    let version = if opts.chart_version.is_empty() {
        tracing::info!("using the default chart version 1.0.0 due to that no chart version is specified");
        "1.0.0".to_string()
    } else {
        opts.chart_version.clone()
    };

    let app_version = opts.app_version.clone().unwrap_or_else(|| version.clone());

    let chart_yaml_path = chart_dir.join("Chart.yaml");
    let content = format!(
        "name: \"{chart_name}\"\nversion: {version}\nappVersion: {app_version}\napiVersion: v2\n"
    );

    tracing::debug!("writing {}", chart_yaml_path.display());

    std::fs::write(&chart_yaml_path, content).map_err(|e| Error::path_io(&chart_yaml_path, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartMeta;

    #[test]
    fn test_probe_source_detects_kustomization() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kustomization.yaml"), "resources: []\n").unwrap();

        let probe = probe_source(&dir.path().display().to_string());
        assert!(probe.is_local);
        assert!(probe.is_kustomization);

        let probe = probe_source("stable/envoy");
        assert!(!probe.is_local);
        assert!(!probe.is_kustomization);
    }

    #[test]
    fn test_relocate_raw_manifests_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("templates")).unwrap();
        std::fs::write(dir.path().join("deployment.yaml"), "kind: Deployment\n").unwrap();
        std::fs::write(dir.path().join("nested/configmap.yml"), "kind: ConfigMap\n").unwrap();

        let relocated = relocate_raw_manifests(dir.path()).unwrap();

        assert_eq!(relocated.len(), 2);
        assert!(dir.path().join("templates/deployment.yaml").exists());
        assert!(dir.path().join("templates/nested/configmap.yml").exists());
        // Emptied source directory is pruned
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn test_synthesize_chart_meta_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ChartifyOptions::default();

        synthesize_chart_meta(dir.path(), "/some/path/my-manifests", &opts).unwrap();

        let meta = ChartMeta::load(dir.path()).unwrap().unwrap();
        assert_eq!(meta.name(), Some("my-manifests"));

        let content = std::fs::read_to_string(dir.path().join("Chart.yaml")).unwrap();
        assert!(content.contains("version: 1.0.0"));
        assert!(content.contains("appVersion: 1.0.0"));
        assert!(content.contains("apiVersion: v2"));
    }

    #[test]
    fn test_synthesize_chart_meta_with_versions() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ChartifyOptions {
            chart_version: "2.3.4".to_string(),
            app_version: Some("9.9".to_string()),
            ..Default::default()
        };

        synthesize_chart_meta(dir.path(), "mychart", &opts).unwrap();

        let content = std::fs::read_to_string(dir.path().join("Chart.yaml")).unwrap();
        assert!(content.contains("version: 2.3.4"));
        assert!(content.contains("appVersion: 9.9"));
    }

    #[test]
    fn test_copy_to_staging_local_dir() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("Chart.yaml"), "name: x\nversion: 0.1.0\n").unwrap();

        let staging = tempfile::tempdir().unwrap();
        let runner = crate::exec::SystemRunner;
        let chart_dir = copy_to_staging(
            &runner,
            "helm",
            &src.path().display().to_string(),
            staging.path(),
            "",
        )
        .unwrap();

        assert_eq!(chart_dir, staging.path());
        assert!(staging.path().join("Chart.yaml").exists());
    }
}
