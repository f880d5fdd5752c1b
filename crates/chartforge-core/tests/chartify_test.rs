//! End-to-end pipeline tests against a faked templating engine
//!
//! The fake emulates just enough of the engine: `dependency up` succeeds,
//! `repo list` returns a fixed table, and `template --output-dir` renders
//! each template file, resolving the double-render indirection stubs the
//! same way the real engine resolves `.Files.Get`.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chartforge_core::error::Result;
use chartforge_core::exec::{CommandOutput, CommandRunner};
use chartforge_core::{AdhocDependency, ChartMeta, Chartifier, ChartifyOptions, HelmMode};

struct FakeHelm {
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeHelm {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl CommandRunner for FakeHelm {
    fn run(
        &self,
        _program: &str,
        args: &[String],
        _dir: Option<&Path>,
        _env: &HashMap<String, String>,
    ) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(args.to_vec());

        match args.first().map(String::as_str) {
            Some("repo") => Ok(CommandOutput {
                stdout: b"NAME  \tURL\nmyrepo\thttps://charts.example.com\n".to_vec(),
                stderr: Vec::new(),
            }),
            Some("dependency") => Ok(CommandOutput::default()),
            Some("template") => {
                let out_idx = args
                    .iter()
                    .position(|a| a == "--output-dir")
                    .expect("tests render in output-dir mode");
                let out_dir = PathBuf::from(&args[out_idx + 1]);
                let chart_dir = PathBuf::from(args.last().unwrap());
                let chart_name = chart_dir.file_name().unwrap().to_string_lossy().into_owned();

                let stub_re = Regex::new(r#"^\{\{ \.Files\.Get "([^"]+)" \}\}$"#).unwrap();

                let mut wrote = String::new();
                for entry in walkdir::WalkDir::new(chart_dir.join("templates")) {
                    let entry = entry.unwrap();
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let content = std::fs::read_to_string(entry.path()).unwrap();
                    let rendered = match stub_re.captures(content.trim()) {
                        Some(caps) => {
                            std::fs::read_to_string(chart_dir.join(&caps[1])).unwrap()
                        }
                        None => content,
                    };

                    let rel = entry.path().strip_prefix(&chart_dir).unwrap();
                    let dst = out_dir.join(&chart_name).join(rel);
                    std::fs::create_dir_all(dst.parent().unwrap()).unwrap();
                    std::fs::write(&dst, rendered).unwrap();
                    wrote.push_str(&format!("wrote {}\n", dst.display()));
                }

                Ok(CommandOutput {
                    stdout: wrote.into_bytes(),
                    stderr: Vec::new(),
                })
            }
            _ => Ok(CommandOutput::default()),
        }
    }
}

#[test]
fn raw_manifests_become_a_chart() {
    let source = tempfile::tempdir().unwrap();
    let source_dir = source.path().join("my-manifests");
    std::fs::create_dir_all(&source_dir).unwrap();
    std::fs::write(
        source_dir.join("deployment.yaml"),
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: app\n",
    )
    .unwrap();
    std::fs::write(
        source_dir.join("configmap.yaml"),
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app-config\n",
    )
    .unwrap();

    let work_root = tempfile::tempdir().unwrap();
    let chartifier = Chartifier::new()
        .with_helm_mode(HelmMode::Helm3)
        .with_runner(Box::new(FakeHelm::new()))
        .with_work_root(work_root.path());

    let opts = ChartifyOptions::default();
    let chart_dir = chartifier
        .chartify("my-release", &source_dir.display().to_string(), &opts)
        .unwrap();

    // A chart shell was synthesized with the default version
    let meta = ChartMeta::load(&chart_dir).unwrap().unwrap();
    assert_eq!(meta.name(), Some("my-manifests"));
    let chart_yaml = std::fs::read_to_string(chart_dir.join("Chart.yaml")).unwrap();
    assert!(chart_yaml.contains("version: 1.0.0"));

    // Both manifests live under templates/, guarded against re-rendering
    for name in ["deployment.yaml", "configmap.yaml"] {
        let stub = std::fs::read_to_string(chart_dir.join("templates").join(name)).unwrap();
        assert_eq!(stub, format!("{{{{ .Files.Get \"files/templates/{name}\" }}}}"));
    }
    let parked =
        std::fs::read_to_string(chart_dir.join("files/templates/deployment.yaml")).unwrap();
    assert!(parked.contains("kind: Deployment"));

    // No stale dependency files survive
    assert!(!chart_dir.join("requirements.yaml").exists());
    assert!(!chart_dir.join("requirements.lock").exists());
}

#[test]
fn local_chart_gains_adhoc_dependency() {
    let source = tempfile::tempdir().unwrap();
    let chart_src = source.path().join("app");
    std::fs::create_dir_all(chart_src.join("templates")).unwrap();
    std::fs::write(
        chart_src.join("Chart.yaml"),
        "apiVersion: v2\nname: app\nversion: 0.1.0\n",
    )
    .unwrap();
    std::fs::write(
        chart_src.join("templates/deploy.yaml"),
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: app\n",
    )
    .unwrap();

    let work_root = tempfile::tempdir().unwrap();
    let runner = Box::new(FakeHelm::new());
    let chartifier = Chartifier::new()
        .with_helm_mode(HelmMode::Helm3)
        .with_runner(runner)
        .with_work_root(work_root.path());

    let opts = ChartifyOptions {
        adhoc_dependencies: vec![AdhocDependency {
            alias: "db".to_string(),
            chart: "myrepo/postgres".to_string(),
            version: "1.2.3".to_string(),
        }],
        ..Default::default()
    };

    let chart_dir = chartifier
        .chartify("my-release", &chart_src.display().to_string(), &opts)
        .unwrap();

    let meta = ChartMeta::load(&chart_dir).unwrap().unwrap();
    assert_eq!(meta.dependencies.len(), 1);
    assert_eq!(meta.dependencies[0].name, "postgres");
    assert_eq!(meta.dependencies[0].alias, "db");
    assert_eq!(meta.dependencies[0].repository, "https://charts.example.com");
    assert_eq!(meta.dependencies[0].condition, "db.enabled");

    // The rendered deployment is guarded under files/
    assert!(chart_dir.join("files/templates/deploy.yaml").exists());
}

#[test]
fn override_namespace_fills_only_missing() {
    let source = tempfile::tempdir().unwrap();
    let source_dir = source.path().join("manifests");
    std::fs::create_dir_all(&source_dir).unwrap();
    std::fs::write(
        source_dir.join("a.yaml"),
        "kind: ConfigMap\nmetadata:\n  name: a\n",
    )
    .unwrap();
    std::fs::write(
        source_dir.join("b.yaml"),
        "kind: ConfigMap\nmetadata:\n  name: b\n  namespace: keep-me\n",
    )
    .unwrap();

    let work_root = tempfile::tempdir().unwrap();
    let chartifier = Chartifier::new()
        .with_helm_mode(HelmMode::Helm3)
        .with_runner(Box::new(FakeHelm::new()))
        .with_work_root(work_root.path());

    let opts = ChartifyOptions {
        override_namespace: Some("other-ns".to_string()),
        ..Default::default()
    };
    let chart_dir = chartifier
        .chartify("rel", &source_dir.display().to_string(), &opts)
        .unwrap();

    let a = std::fs::read_to_string(chart_dir.join("files/templates/a.yaml")).unwrap();
    assert!(a.contains("namespace: other-ns"));

    let b = std::fs::read_to_string(chart_dir.join("files/templates/b.yaml")).unwrap();
    assert!(b.contains("namespace: keep-me"));
    assert!(!b.contains("other-ns"));
}
