//! chartforge CLI - chartify an arbitrary Kubernetes packaging source

use clap::Parser;
use miette::{IntoDiagnostic, Result, WrapErr};
use std::path::PathBuf;

use chartforge_core::{Chartifier, ChartifyOptions, HelmMode, Patch, fsutil};

#[derive(Parser)]
#[command(name = "chartforge")]
#[command(version)]
#[command(about = "Turn a Helm chart, Kustomize project, or raw manifests into a self-contained chart", long_about = None)]
struct Cli {
    /// Release name the chart will be rendered for
    release: String,

    /// Source: a local chart or manifest directory, a kustomize project,
    /// or a remote chart reference like repo/chart
    source: String,

    /// Values file(s) to pass to the templating engine
    #[arg(short = 'f', long = "values")]
    values: Vec<PathBuf>,

    /// Set values on the command line (key=value)
    #[arg(long = "set")]
    set: Vec<String>,

    /// Default namespace for the rendered manifests
    #[arg(short, long, default_value = "")]
    namespace: String,

    /// Set the namespace of rendered resources that do not declare one
    #[arg(long)]
    override_namespace: Option<String>,

    /// Chart version to render (also the synthesized version for raw
    /// manifests)
    #[arg(long)]
    chart_version: Option<String>,

    /// Application version recorded in synthesized chart metadata
    #[arg(long)]
    app_version: Option<String>,

    /// Ad hoc chart dependency in the form alias=repoOrPath/chart:version;
    /// repeatable
    #[arg(short = 'd', long = "dependency")]
    dependencies: Vec<String>,

    /// JSON-Patch spec file; repeatable
    #[arg(long = "json-patch")]
    json_patches: Vec<PathBuf>,

    /// Strategic-merge patch file; repeatable
    #[arg(long = "strategic-merge-patch")]
    strategic_merge_patches: Vec<PathBuf>,

    /// Patch file applied by resource identity or, for JSON patches, by a
    /// target embedded in the file; repeatable
    #[arg(long = "patch")]
    patches: Vec<PathBuf>,

    /// Overlay transformer config file; repeatable
    #[arg(long = "transformer")]
    transformers: Vec<PathBuf>,

    /// Injector spec command,key1=value1[,...] with a FILE placeholder;
    /// repeatable
    #[arg(long = "injector")]
    injectors: Vec<String>,

    /// Raw injector command template with a FILE placeholder; repeatable
    #[arg(long = "inject")]
    injects: Vec<String>,

    /// Pass --include-crds to the templating engine
    #[arg(long)]
    include_crds: bool,

    /// Skip refreshing chart dependencies before rendering
    #[arg(long)]
    skip_deps: bool,

    /// Pass the overlay-build engine's alpha-plugins flag
    #[arg(long)]
    enable_kustomize_alpha_plugins: bool,

    /// Use a combined-stdout render instead of the engine's output
    /// directory mode
    #[arg(long)]
    workaround_output_dir_issue: bool,

    /// Explicit staging-directory identifier
    #[arg(long)]
    id: Option<String>,

    /// Name or path of the templating-engine binary
    #[arg(long, env = "HELM_BIN")]
    helm_bin: Option<String>,

    /// Name or path of the overlay-build binary
    #[arg(long)]
    kustomize_bin: Option<String>,

    /// Target the legacy templating-engine generation
    #[arg(long)]
    helm2: bool,

    /// Copy the finished chart into this directory instead of leaving it
    /// in the staging area
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

impl Cli {
    fn to_options(&self) -> ChartifyOptions {
        ChartifyOptions {
            debug: self.debug,
            values_files: self.values.clone(),
            set_values: self.set.clone(),
            namespace: self.namespace.clone(),
            chart_version: self.chart_version.clone().unwrap_or_default(),
            app_version: self.app_version.clone(),
            override_namespace: self.override_namespace.clone(),
            adhoc_dependencies: Vec::new(),
            deprecated_adhoc_dependencies: self.dependencies.clone(),
            json_patches: self.json_patches.clone(),
            strategic_merge_patches: self.strategic_merge_patches.clone(),
            patches: self
                .patches
                .iter()
                .map(|p| Patch {
                    path: Some(p.clone()),
                    ..Default::default()
                })
                .collect(),
            transformers: self.transformers.clone(),
            injectors: self.injectors.clone(),
            injects: self.injects.clone(),
            include_crds: self.include_crds,
            skip_deps: self.skip_deps,
            enable_kustomize_alpha_plugins: self.enable_kustomize_alpha_plugins,
            workaround_output_dir_issue: self.workaround_output_dir_issue,
            id: self.id.clone(),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut chartifier = Chartifier::new();
    if let Some(bin) = &cli.helm_bin {
        chartifier = chartifier.with_helm_bin(bin.clone());
    }
    if let Some(bin) = &cli.kustomize_bin {
        chartifier = chartifier.with_kustomize_bin(bin.clone());
    }
    if cli.helm2 {
        chartifier = chartifier.with_helm_mode(HelmMode::Helm2);
    }

    let opts = cli.to_options();

    let chart_dir = chartifier
        .chartify(&cli.release, &cli.source, &opts)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to chartify {}", cli.source))?;

    if let Some(output) = &cli.output {
        fsutil::copy_dir(&chart_dir, output)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to copy chart to {}", output.display()))?;
        println!("{}", output.display());
    } else {
        println!("{}", chart_dir.display());
    }

    Ok(())
}
