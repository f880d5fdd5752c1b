//! The chartification pipeline
//!
//! [`Chartifier::chartify`] runs the ordered sequence of staging-directory
//! transformations: namer, source normalizer, dependency merger, render
//! delegate, patch engine, namespace rewriter, post-render injector, and
//! the double-render guard. Stages are strictly sequential; each consumes
//! the filesystem state the previous one left behind.

use std::path::{Path, PathBuf};

use crate::chart::HelmMode;
use crate::deps;
use crate::error::Result;
use crate::exec::{CommandRunner, SystemRunner, run_captured};
use crate::fsutil;
use crate::guard;
use crate::inject::{self, InjectOpts};
use crate::namespace;
use crate::normalize;
use crate::options::{AdhocDependency, ChartifyOptions};
use crate::patch::{self, PatchOpts};
use crate::render::{self, KustomizeBuildOpts, RenderOpts};
use crate::staging;

/// Environment variable opting in to the current templating-engine
/// generation without probing the binary
pub const ENV_HELM3: &str = "CHARTFORGE_HELM3";

/// Runs chartification pipelines
pub struct Chartifier {
    helm_bin: String,
    kustomize_bin: String,
    helm_mode: Option<HelmMode>,
    runner: Box<dyn CommandRunner>,
    work_root: Option<PathBuf>,
}

impl Default for Chartifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Chartifier {
    pub fn new() -> Self {
        Self {
            helm_bin: String::new(),
            kustomize_bin: String::new(),
            helm_mode: None,
            runner: Box::new(SystemRunner),
            work_root: None,
        }
    }

    /// Name or path of the templating-engine binary
    pub fn with_helm_bin(mut self, bin: impl Into<String>) -> Self {
        self.helm_bin = bin.into();
        self
    }

    /// Name or path of the overlay-build binary
    pub fn with_kustomize_bin(mut self, bin: impl Into<String>) -> Self {
        self.kustomize_bin = bin.into();
        self
    }

    /// Pin the templating-engine generation instead of probing for it
    pub fn with_helm_mode(mut self, mode: HelmMode) -> Self {
        self.helm_mode = Some(mode);
        self
    }

    /// Substitute the command runner (used by tests)
    pub fn with_runner(mut self, runner: Box<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Override where staging directories are created
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    fn helm_bin(&self) -> String {
        if !self.helm_bin.is_empty() {
            return self.helm_bin.clone();
        }
        std::env::var("HELM_BIN").unwrap_or_else(|_| "helm".to_string())
    }

    fn kustomize_bin(&self) -> String {
        if !self.kustomize_bin.is_empty() {
            return self.kustomize_bin.clone();
        }
        "kustomize".to_string()
    }

    /// The generation this run targets: pinned, env opt-in, or probed once
    /// from the binary
    fn resolve_helm_mode(&self) -> Result<HelmMode> {
        if let Some(mode) = self.helm_mode {
            return Ok(mode);
        }

        if std::env::var(ENV_HELM3)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
        {
            return Ok(HelmMode::Helm3);
        }

        let out = run_captured(
            self.runner.as_ref(),
            &self.helm_bin(),
            &[
                "version".to_string(),
                "--client".to_string(),
                "--short".to_string(),
            ],
            None,
        )?;
        let version = out.stdout_string();
        let version = version.trim();

        if version.starts_with("v3.") || version.starts_with("v4.") {
            Ok(HelmMode::Helm3)
        } else {
            Ok(HelmMode::Helm2)
        }
    }

    /// Turn an arbitrary packaging source into a self-contained chart under
    /// a deterministic staging directory, applying every transformation the
    /// options request
    ///
    /// Returns the path to the finished chart. The staging directory is
    /// owned by the caller afterwards: remove it after consuming the
    /// result, or keep it around for debugging.
    pub fn chartify(
        &self,
        release: &str,
        source: &str,
        opts: &ChartifyOptions,
    ) -> Result<PathBuf> {
        opts.validate()?;

        let runner = self.runner.as_ref();
        let helm_bin = self.helm_bin();
        let helm_mode = self.resolve_helm_mode()?;

        let probe = normalize::probe_source(source);

        let staging_dir =
            staging::make_staging_dir(release, source, opts, self.work_root.as_deref())?;

        // Kustomization sources are built into the staging directory by the
        // overlay engine; everything else is materialized first.
        let chart_dir = if probe.is_kustomization {
            staging_dir.clone()
        } else {
            normalize::copy_to_staging(
                runner,
                &helm_bin,
                source,
                &staging_dir,
                &opts.chart_version,
            )?
        };

        let is_chart = fsutil::exists(&chart_dir.join("Chart.yaml"));
        normalize::ensure_templates_dir(&chart_dir)?;

        let mut override_namespace = opts.override_namespace.clone();

        let mut generated_under_templates: Vec<PathBuf> = Vec::new();

        if probe.is_kustomization {
            let kustomize_opts = KustomizeBuildOpts {
                values_files: opts.values_files.clone(),
                set_values: opts.set_values.clone(),
                enable_alpha_plugins: opts.enable_kustomize_alpha_plugins,
                namespace: opts.namespace.clone(),
            };
            let built = render::kustomize_build(
                runner,
                &self.kustomize_bin(),
                Path::new(source),
                &chart_dir,
                &kustomize_opts,
            )?;
            generated_under_templates.push(built);
        } else if !is_chart {
            let relocated = normalize::relocate_raw_manifests(&chart_dir)?;
            generated_under_templates.extend(relocated);

            // Raw manifests carry their namespaces verbatim; fall back to
            // the target namespace for documents that declare none.
            if override_namespace.is_none() && !opts.namespace.is_empty() {
                override_namespace = Some(opts.namespace.clone());
            }
        }

        if !is_chart {
            normalize::synthesize_chart_meta(&chart_dir, source, opts)?;

            // The content generated so far is already final; guard it so
            // the upcoming render pass reads it as opaque data.
            let files_dir = guard::ensure_files_dir(&chart_dir)?;
            guard::prevent_double_rendering(&chart_dir, &files_dir)?;
        }

        let adhoc = self.collect_adhoc_dependencies(opts)?;
        let resolved = deps::resolve_adhoc_dependencies(runner, &helm_bin, &adhoc)?;

        // Remote charts arrive with their declared sub-charts pre-fetched;
        // replacing instead of appending keeps the render delegate from
        // re-fetching them.
        let replace = !probe.is_local;
        deps::update_requirements(helm_mode, replace, &chart_dir, &resolved)?;

        let need_dep_refresh = if probe.is_local {
            if opts.skip_deps && resolved.is_empty() {
                tracing::info!(
                    "skipping dependency refresh on release {release}'s chart; its dependencies may be outdated"
                );
                false
            } else {
                true
            }
        } else {
            // Only the ad hoc entries remain declared; nothing else will
            // fetch them.
            !resolved.is_empty()
        };

        if need_dep_refresh {
            run_captured(
                runner,
                &helm_bin,
                &[
                    "dependency".to_string(),
                    "up".to_string(),
                    chart_dir.display().to_string(),
                ],
                None,
            )?;
        }

        let render_opts = RenderOpts {
            debug: opts.debug,
            values_files: opts.values_files.clone(),
            set_values: opts.set_values.clone(),
            namespace: opts.namespace.clone(),
            include_crds: opts.include_crds,
            workaround_output_dir_issue: opts.workaround_output_dir_issue,
        };

        let mut generated_files = render::replace_with_rendered(
            runner,
            &helm_bin,
            helm_mode,
            release,
            &chart_dir,
            &generated_under_templates,
            &render_opts,
        )?;

        // Everything is rendered now; leftover requirements/lock files
        // would only make a later templating pass re-resolve dependencies.
        // Their removal is best-effort.
        for stale in ["requirements.yaml", "requirements.lock"] {
            let path = chart_dir.join(stale);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to remove {}: {e}", path.display());
                }
            }
        }

        let patch_opts = PatchOpts {
            json_patches: opts.json_patches.clone(),
            strategic_merge_patches: opts.strategic_merge_patches.clone(),
            patches: opts.patches.clone(),
            transformers: opts.transformers.clone(),
            enable_alpha_plugins: opts.enable_kustomize_alpha_plugins,
        };
        if !patch_opts.is_empty() {
            let summary = patch::apply_patches(
                runner,
                &self.kustomize_bin(),
                helm_mode,
                &chart_dir,
                &generated_files,
                &patch_opts,
            )?;
            generated_files = summary.written_files;
        }

        if let Some(ns) = override_namespace.as_deref() {
            if !ns.is_empty() {
                namespace::set_namespace(&chart_dir, ns)?;
            }
        }

        let inject_opts = InjectOpts {
            injectors: opts.injectors.clone(),
            injects: opts.injects.clone(),
        };
        if !inject_opts.is_empty() {
            inject::inject(runner, &generated_files, &inject_opts)?;
        }

        let files_dir = guard::ensure_files_dir(&chart_dir)?;
        guard::prevent_double_rendering(&chart_dir, &files_dir)?;

        Ok(chart_dir)
    }

    /// Normalize compact-form and structured ad hoc dependencies into one
    /// list
    fn collect_adhoc_dependencies(
        &self,
        opts: &ChartifyOptions,
    ) -> Result<Vec<AdhocDependency>> {
        let mut adhoc = Vec::with_capacity(
            opts.deprecated_adhoc_dependencies.len() + opts.adhoc_dependencies.len(),
        );
        for spec in &opts.deprecated_adhoc_dependencies {
            adhoc.push(AdhocDependency::parse_compact(spec)?);
        }
        adhoc.extend(opts.adhoc_dependencies.iter().cloned());
        Ok(adhoc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_adhoc_dependencies_merges_both_forms() {
        let chartifier = Chartifier::new();
        let opts = ChartifyOptions {
            deprecated_adhoc_dependencies: vec!["db=myrepo/postgres:1.2.3".to_string()],
            adhoc_dependencies: vec![AdhocDependency {
                alias: String::new(),
                chart: "myrepo/redis".to_string(),
                version: "*".to_string(),
            }],
            ..Default::default()
        };

        let adhoc = chartifier.collect_adhoc_dependencies(&opts).unwrap();
        assert_eq!(adhoc.len(), 2);
        assert_eq!(adhoc[0].alias, "db");
        assert_eq!(adhoc[1].chart, "myrepo/redis");
    }

    #[test]
    fn test_helm_bin_defaults() {
        let chartifier = Chartifier::new().with_helm_bin("helm3");
        assert_eq!(chartifier.helm_bin(), "helm3");
        assert_eq!(chartifier.kustomize_bin(), "kustomize");
    }

    #[test]
    fn test_resolve_helm_mode_pinned() {
        let chartifier = Chartifier::new().with_helm_mode(HelmMode::Helm2);
        assert_eq!(chartifier.resolve_helm_mode().unwrap(), HelmMode::Helm2);
    }
}
