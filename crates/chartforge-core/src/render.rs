//! Render delegates
//!
//! Invocations of the external templating engine (`helm template`, `helm
//! fetch`) and the overlay-build engine (`kustomize build`) for
//! kustomization sources. The pipeline never interprets template syntax
//! itself; it only orchestrates these tools and the file layout around
//! them.

use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chart::HelmMode;
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, run_captured};
use crate::fsutil;
use crate::patch::Kustomization;

/// Name of the private directory the templating engine renders into before
/// relocation back into the staging chart
const RENDER_DIR: &str = "chartforge.rendered";

/// Options for a templating-engine render
#[derive(Debug, Clone, Default)]
pub struct RenderOpts {
    pub debug: bool,
    pub values_files: Vec<PathBuf>,
    pub set_values: Vec<String>,
    pub namespace: String,
    pub include_crds: bool,
    /// Capture the combined stdout stream into a single file instead of
    /// using the engine's output-directory mode
    pub workaround_output_dir_issue: bool,
}

/// Render the staging chart and replace its template sources with the
/// rendered output
///
/// `files_to_remove` are the pre-render manifest files that the rendered
/// output supersedes. Returns the rendered files at their final locations
/// inside the staging chart.
pub fn replace_with_rendered(
    runner: &dyn CommandRunner,
    helm_bin: &str,
    helm_mode: HelmMode,
    release: &str,
    chart_dir: &Path,
    files_to_remove: &[PathBuf],
    opts: &RenderOpts,
) -> Result<Vec<PathBuf>> {
    let render_dir = chart_dir.join(RENDER_DIR);
    if fsutil::exists(&render_dir) {
        std::fs::remove_dir_all(&render_dir).map_err(|e| Error::path_io(&render_dir, e))?;
    }
    std::fs::create_dir(&render_dir).map_err(|e| Error::path_io(&render_dir, e))?;

    let chart_name = chart_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut written_files: Vec<PathBuf> = Vec::new();

    if helm_mode.is_current() && opts.workaround_output_dir_issue {
        let template_path = render_dir
            .join(&chart_name)
            .join("templates")
            .join("all.yaml");
        fsutil::create_dir_for_file(&template_path)?;

        let args = template_args(helm_mode, release, chart_dir, None, opts)?;
        let out = run_captured(runner, helm_bin, &args, None)?;

        std::fs::write(&template_path, &out.stdout)
            .map_err(|e| Error::path_io(&template_path, e))?;
        written_files.push(template_path);
    } else {
        let args = template_args(helm_mode, release, chart_dir, Some(&render_dir), opts)?;
        let out = run_captured(runner, helm_bin, &args, None)?;

        for line in out.stdout_string().lines() {
            if let Some(file) = line.strip_prefix("wrote ") {
                written_files.push(PathBuf::from(file));
            }
        }
    }

    if written_files.is_empty() {
        return Err(Error::NoFilesRendered);
    }

    for f in files_to_remove {
        tracing::debug!("removing {}", f.display());
        std::fs::remove_file(f).map_err(|e| Error::path_io(f, e))?;
    }

    // Relocate the rendered files back into the staging chart, stripping
    // the render-dir and chart-name segments, so `templates/`, `crds/` and
    // `charts/<sub>/templates/` end up populated in place.
    let mut results = Vec::with_capacity(written_files.len());
    for file in written_files {
        let Ok(rel) = file.strip_prefix(&render_dir) else {
            tracing::warn!("ignoring rendered file outside the render dir: {}", file.display());
            continue;
        };
        let mut components = rel.components();
        components.next();
        let rel_in_chart: PathBuf = components.as_path().to_path_buf();

        let dst = chart_dir.join(&rel_in_chart);
        fsutil::create_dir_for_file(&dst)?;
        std::fs::rename(&file, &dst).map_err(|e| Error::path_io(&dst, e))?;
        results.push(dst);
    }

    std::fs::remove_dir_all(&render_dir).map_err(|e| Error::path_io(&render_dir, e))?;

    results.sort();

    Ok(results)
}

/// Assemble the `helm template` argument list for the given generation
fn template_args(
    helm_mode: HelmMode,
    release: &str,
    chart_dir: &Path,
    output_dir: Option<&Path>,
    opts: &RenderOpts,
) -> Result<Vec<String>> {
    let mut args = vec!["template".to_string()];

    if opts.debug {
        args.push("--debug".to_string());
    }

    if let Some(dir) = output_dir {
        args.push("--output-dir".to_string());
        args.push(dir.display().to_string());
    }

    for set in &opts.set_values {
        args.push("--set".to_string());
        args.push(set.clone());
    }

    let default_values = chart_dir.join("values.yaml");
    if fsutil::exists(&default_values) {
        args.push("-f".to_string());
        args.push(default_values.display().to_string());
    }
    for f in &opts.values_files {
        args.push("-f".to_string());
        args.push(f.display().to_string());
    }

    if !opts.namespace.is_empty() {
        args.push("--namespace".to_string());
        args.push(opts.namespace.clone());
    }

    if helm_mode.is_current() {
        if opts.include_crds {
            args.push("--include-crds".to_string());
        }
        args.push(release.to_string());
        args.push(chart_dir.display().to_string());
    } else {
        args.push(chart_dir.display().to_string());
        args.push("--name".to_string());
        args.push(release.to_string());
    }

    Ok(args)
}

/// Tweaks read from values files for kustomization sources
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct KustomizeTweaks {
    images: Vec<KustomizeImage>,
    name_prefix: String,
    name_suffix: String,
    namespace: String,
}

impl KustomizeTweaks {
    /// Overlay the fields another values file set on top of this one
    fn merge(&mut self, other: KustomizeTweaks) {
        if !other.images.is_empty() {
            self.images = other.images;
        }
        if !other.name_prefix.is_empty() {
            self.name_prefix = other.name_prefix;
        }
        if !other.name_suffix.is_empty() {
            self.name_suffix = other.name_suffix;
        }
        if !other.namespace.is_empty() {
            self.namespace = other.namespace;
        }
    }
}

/// An image override as understood by the overlay-build engine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KustomizeImage {
    pub name: String,
    pub new_name: String,
    pub new_tag: String,
    pub digest: String,
}

impl std::fmt::Display for KustomizeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.new_name.is_empty() {
            write!(f, "={}", self.new_name)?;
        }
        if !self.new_tag.is_empty() {
            write!(f, ":{}", self.new_tag)?;
        }
        if !self.digest.is_empty() {
            write!(f, "@{}", self.digest)?;
        }
        Ok(())
    }
}

/// Options for building a kustomization source
#[derive(Debug, Clone, Default)]
pub struct KustomizeBuildOpts {
    pub values_files: Vec<PathBuf>,
    pub set_values: Vec<String>,
    pub enable_alpha_plugins: bool,
    pub namespace: String,
}

/// Build a kustomization source into `templates/kustomized.yaml` inside the
/// staging directory
pub fn kustomize_build(
    runner: &dyn CommandRunner,
    kustomize_bin: &str,
    src_dir: &Path,
    staging_dir: &Path,
    opts: &KustomizeBuildOpts,
) -> Result<PathBuf> {
    if !opts.set_values.is_empty() {
        return Err(Error::KustomizeSetValuesUnsupported);
    }

    let mut tweaks = KustomizeTweaks::default();
    for f in &opts.values_files {
        let content = std::fs::read_to_string(f).map_err(|e| Error::path_io(f, e))?;
        let parsed: KustomizeTweaks =
            serde_yaml::from_str(&content).map_err(|e| Error::YamlFile {
                path: f.clone(),
                source: e,
            })?;
        tweaks.merge(parsed);
    }
    if !opts.namespace.is_empty() {
        tweaks.namespace = opts.namespace.clone();
    }

    // A synthetic kustomization pointing back at the source, so edits and
    // the build run against the staging copy without touching the source.
    let evaluated_staging =
        std::fs::canonicalize(staging_dir).map_err(|e| Error::path_io(staging_dir, e))?;
    let absolute_src = if src_dir.is_absolute() {
        src_dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(src_dir)
    };
    let rel_src = fsutil::relative_path(&evaluated_staging, &absolute_src);

    let kustomization = Kustomization {
        resources: vec![rel_src.display().to_string()],
        ..Default::default()
    };
    let kustomization_path = staging_dir.join("kustomization.yaml");
    std::fs::write(&kustomization_path, serde_yaml::to_string(&kustomization)?)
        .map_err(|e| Error::path_io(&kustomization_path, e))?;

    if !tweaks.images.is_empty() {
        let mut args = vec![
            "edit".to_string(),
            "set".to_string(),
            "image".to_string(),
        ];
        args.extend(tweaks.images.iter().map(|i| i.to_string()));
        run_captured(runner, kustomize_bin, &args, Some(staging_dir))?;
    }
    if !tweaks.name_prefix.is_empty() {
        let args = vec![
            "edit".to_string(),
            "set".to_string(),
            "nameprefix".to_string(),
            tweaks.name_prefix.clone(),
        ];
        run_captured(runner, kustomize_bin, &args, Some(staging_dir))?;
    }
    if !tweaks.name_suffix.is_empty() {
        // "--" keeps a suffix like "-acme" from being read as a flag
        let args = vec![
            "edit".to_string(),
            "set".to_string(),
            "namesuffix".to_string(),
            "--".to_string(),
            tweaks.name_suffix.clone(),
        ];
        run_captured(runner, kustomize_bin, &args, Some(staging_dir))?;
    }
    if !tweaks.namespace.is_empty() {
        let args = vec![
            "edit".to_string(),
            "set".to_string(),
            "namespace".to_string(),
            tweaks.namespace.clone(),
        ];
        run_captured(runner, kustomize_bin, &args, Some(staging_dir))?;
    }

    let output_file = staging_dir.join("templates").join("kustomized.yaml");
    fsutil::create_dir_for_file(&output_file)?;

    let mut build_args = vec![
        "build".to_string(),
        staging_dir.display().to_string(),
        "--output".to_string(),
        output_file.display().to_string(),
    ];
    build_args.extend(kustomize_version_flags(
        runner,
        kustomize_bin,
        opts.enable_alpha_plugins,
    ));

    run_captured(runner, kustomize_bin, &build_args, Some(staging_dir))?;

    std::fs::remove_file(&kustomization_path).map_err(|e| Error::path_io(&kustomization_path, e))?;

    Ok(output_file)
}

/// Flag spelling differs across overlay-build engine major versions
fn kustomize_version_flags(
    runner: &dyn CommandRunner,
    kustomize_bin: &str,
    enable_alpha_plugins: bool,
) -> Vec<String> {
    let mut flags = Vec::new();
    if probe_kustomize_major(runner, kustomize_bin) > 3 {
        flags.push("--load-restrictor=LoadRestrictionsNone".to_string());
        if enable_alpha_plugins {
            flags.push("--enable-alpha-plugins".to_string());
        }
    } else {
        flags.push("--load_restrictor=none".to_string());
        if enable_alpha_plugins {
            flags.push("--enable_alpha_plugins".to_string());
        }
    }
    flags
}

/// The alpha-plugins flag in the spelling the installed engine expects
pub(crate) fn kustomize_alpha_plugins_flag(
    runner: &dyn CommandRunner,
    kustomize_bin: &str,
) -> String {
    if probe_kustomize_major(runner, kustomize_bin) > 3 {
        "--enable-alpha-plugins".to_string()
    } else {
        "--enable_alpha_plugins".to_string()
    }
}

fn probe_kustomize_major(runner: &dyn CommandRunner, kustomize_bin: &str) -> u32 {
    kustomize_major_version(runner, kustomize_bin).unwrap_or_else(|e| {
        tracing::warn!(
            "failed to probe `{kustomize_bin} version`: {e}\nfalling back to the kustomize v4 mode"
        );
        4
    })
}

fn kustomize_major_version(runner: &dyn CommandRunner, kustomize_bin: &str) -> Result<u32> {
    let out = run_captured(
        runner,
        kustomize_bin,
        &["version".to_string(), "--short".to_string()],
        None,
    )?;
    let version = find_semver_info(out.stdout_string().trim())?;
    let major = version
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|m| m.parse::<u32>().ok())
        .ok_or_else(|| Error::NoSemverInfo {
            version: version.clone(),
        })?;
    Ok(major)
}

/// Extract a semantic-version substring out of arbitrary version output
pub fn find_semver_info(version: &str) -> Result<String> {
    if version.is_empty() {
        return Err(Error::NoSemverInfo {
            version: version.to_string(),
        });
    }

    let processed = {
        let trimmed = version.trim();
        if trimmed.starts_with('v') {
            trimmed.to_string()
        } else {
            format!("v{trimmed}")
        }
    };

    let re = Regex::new(
        r"v([0-9]+)(\.[0-9]+)?(\.[0-9]+)?(-([0-9A-Za-z\-]+(\.[0-9A-Za-z\-]+)*))?(\+([0-9A-Za-z\-]+(\.[0-9A-Za-z\-]+)*))?",
    )
    .expect("static regex");

    re.find(&processed)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::NoSemverInfo {
            version: version.to_string(),
        })
}
