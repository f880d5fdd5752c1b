//! Dependency merging
//!
//! Reconciles ad hoc dependency requests with whatever the source chart
//! already declares, across both packaging-manifest generations, and writes
//! the merged list back to the generation-appropriate location.

use regex::Regex;
use std::path::Path;

use crate::chart::{ChartMeta, Dependency, HelmMode, Requirements};
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, run_captured};
use crate::fsutil;
use crate::options::AdhocDependency;

/// Resolve ad hoc dependency requests into full dependency declarations
///
/// A chart reference that names an existing local path becomes a `file://`
/// repository whose dependency name is the path's base name. Anything else
/// must be `repo/chart`, with the repository URL resolved against the
/// templating engine's registered repository list. The condition defaults
/// to `<alias-or-name>.enabled`.
pub fn resolve_adhoc_dependencies(
    runner: &dyn CommandRunner,
    helm_bin: &str,
    adhoc: &[AdhocDependency],
) -> Result<Vec<Dependency>> {
    let mut resolved = Vec::with_capacity(adhoc.len());

    for dep in adhoc {
        let (name, repo_url) = if fsutil::exists(Path::new(&dep.chart)) {
            let name = Path::new(&dep.chart)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dep.chart.clone());
            (name, format!("file://{}", dep.chart))
        } else {
            let (repo, name) = dep.chart.split_once('/').ok_or_else(|| {
                Error::InvalidDependency {
                    spec: dep.chart.clone(),
                }
            })?;
            let url = lookup_repo_url(runner, helm_bin, repo)?;
            (name.to_string(), url)
        };

        let cond_name = if dep.alias.is_empty() {
            name.clone()
        } else {
            dep.alias.clone()
        };

        resolved.push(Dependency {
            name,
            repository: repo_url,
            condition: format!("{cond_name}.enabled"),
            alias: dep.alias.clone(),
            version: dep.version.clone(),
            import_values: Vec::new(),
        });
    }

    Ok(resolved)
}

/// Resolve a repository alias to its URL via the registered repository list
pub fn lookup_repo_url(runner: &dyn CommandRunner, helm_bin: &str, repo: &str) -> Result<String> {
    let out = run_captured(
        runner,
        helm_bin,
        &["repo".to_string(), "list".to_string()],
        None,
    )?;
    let out = out.stdout_string();

    let whitespace = Regex::new(r"\s+").expect("static regex");

    for (line_num, line) in out.lines().enumerate() {
        if line_num == 0 || line.trim().is_empty() {
            continue;
        }
        let tokens: Vec<&str> = whitespace.split(line.trim()).collect();
        if tokens.len() < 2 {
            return Err(Error::RepoListParse {
                line_num,
                line: line.to_string(),
                output: out.clone(),
            });
        }
        if tokens[0] == repo {
            return Ok(tokens[1].to_string());
        }
    }

    Err(Error::RepositoryNotFound {
        name: repo.to_string(),
    })
}

/// Merge ad hoc dependencies into the chart's declared list and write the
/// result back to the generation-appropriate metadata file
///
/// `replace` holds for remotely-fetched charts: their declared dependencies
/// were already downloaded into `charts/` by the fetch, so only the ad hoc
/// entries may remain declared, otherwise the render delegate would try to
/// fetch sub-charts it already has. Local charts get original + ad hoc
/// appended instead. Either way the written and returned lists are
/// deduplicated by resolved name, so re-merging the same dependency is a
/// no-op.
///
/// Returns the full merged list (original + ad hoc), which callers need for
/// condition handling regardless of what was written.
pub fn update_requirements(
    helm_mode: HelmMode,
    replace: bool,
    chart_dir: &Path,
    adhoc: &[Dependency],
) -> Result<Vec<Dependency>> {
    let reqs = Requirements::load(chart_dir)?.unwrap_or_default();

    if helm_mode.is_current() {
        let mut meta = ChartMeta::load(chart_dir)?.unwrap_or_default();

        let mut all = meta.dependencies.clone();
        all.extend(reqs.dependencies);
        all.extend(adhoc.iter().cloned());
        let all = dedup_by_name(all);

        meta.dependencies = if replace {
            dedup_by_name(adhoc.to_vec())
        } else {
            all.clone()
        };
        meta.save(chart_dir)?;

        // The legacy requirements/lock files are superseded by the inline
        // list; leaving them behind would make the render delegate resolve
        // dependencies that are already satisfied.
        for stale in ["requirements.yaml", "requirements.lock"] {
            let path = chart_dir.join(stale);
            if fsutil::exists(&path) {
                tracing::debug!("removing superseded {}", path.display());
                std::fs::remove_file(&path).map_err(|e| Error::path_io(&path, e))?;
            }
        }

        Ok(all)
    } else {
        let mut all = reqs.dependencies.clone();
        all.extend(adhoc.iter().cloned());
        let all = dedup_by_name(all);

        let written = Requirements {
            dependencies: if replace {
                dedup_by_name(adhoc.to_vec())
            } else {
                all.clone()
            },
        };

        let path = chart_dir.join("requirements.yaml");
        let content = serde_yaml::to_string(&written)?;
        tracing::debug!("using requirements.yaml:\n{content}");
        std::fs::write(&path, content).map_err(|e| Error::path_io(&path, e))?;

        Ok(all)
    }
}

/// Keep the first declaration of each dependency name
fn dedup_by_name(deps: Vec<Dependency>) -> Vec<Dependency> {
    let mut seen = std::collections::HashSet::new();
    deps.into_iter()
        .filter(|d| seen.insert(d.name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, ScriptedRunner};

    fn repo_list_runner() -> impl CommandRunner {
        ScriptedRunner {
            script: |_, args: &[String], _| {
                assert_eq!(args, &["repo".to_string(), "list".to_string()]);
                Ok(CommandOutput {
                    stdout: b"NAME \tURL\nstable \thttps://charts.helm.sh/stable\nmyrepo\thttps://charts.example.com\n"
                        .to_vec(),
                    stderr: Vec::new(),
                })
            },
        }
    }

    #[test]
    fn test_lookup_repo_url() {
        let runner = repo_list_runner();
        let url = lookup_repo_url(&runner, "helm", "myrepo").unwrap();
        assert_eq!(url, "https://charts.example.com");
    }

    #[test]
    fn test_lookup_repo_url_unregistered_is_fatal() {
        let runner = repo_list_runner();
        let err = lookup_repo_url(&runner, "helm", "unknown").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown"));
        assert!(message.contains("helm repo add"));
    }

    #[test]
    fn test_resolve_adhoc_local_path() {
        let local = tempfile::tempdir().unwrap();
        let chart_path = local.path().join("mychart");
        std::fs::create_dir_all(&chart_path).unwrap();

        let runner = repo_list_runner();
        let resolved = resolve_adhoc_dependencies(
            &runner,
            "helm",
            &[AdhocDependency {
                alias: String::new(),
                chart: chart_path.display().to_string(),
                version: "*".to_string(),
            }],
        )
        .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "mychart");
        assert_eq!(
            resolved[0].repository,
            format!("file://{}", chart_path.display())
        );
        assert_eq!(resolved[0].condition, "mychart.enabled");
    }

    #[test]
    fn test_resolve_adhoc_repo_chart_with_alias() {
        let runner = repo_list_runner();
        let resolved = resolve_adhoc_dependencies(
            &runner,
            "helm",
            &[AdhocDependency {
                alias: "db".to_string(),
                chart: "myrepo/postgres".to_string(),
                version: "1.2.3".to_string(),
            }],
        )
        .unwrap();

        assert_eq!(resolved[0].name, "postgres");
        assert_eq!(resolved[0].repository, "https://charts.example.com");
        assert_eq!(resolved[0].condition, "db.enabled");
        assert_eq!(resolved[0].alias, "db");
        assert_eq!(resolved[0].version, "1.2.3");
    }

    fn dep(name: &str) -> Dependency {
        Dependency {
            name: name.to_string(),
            repository: format!("https://charts.example.com/{name}"),
            condition: format!("{name}.enabled"),
            ..Default::default()
        }
    }

    #[test]
    fn test_update_requirements_current_generation_appends() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Chart.yaml"),
            "apiVersion: v2\nname: app\nversion: 1.0.0\ndependencies:\n- name: redis\n  repository: https://charts.example.com/redis\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("requirements.lock"), "digest: abc\n").unwrap();

        let all =
            update_requirements(HelmMode::Helm3, false, dir.path(), &[dep("postgres")]).unwrap();

        assert_eq!(all.len(), 2);

        let meta = ChartMeta::load(dir.path()).unwrap().unwrap();
        assert_eq!(meta.dependencies.len(), 2);
        assert_eq!(meta.name(), Some("app"));
        assert!(!dir.path().join("requirements.lock").exists());
    }

    #[test]
    fn test_update_requirements_current_generation_replaces_for_remote() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Chart.yaml"),
            "apiVersion: v2\nname: app\nversion: 1.0.0\ndependencies:\n- name: redis\n  repository: https://charts.example.com/redis\n",
        )
        .unwrap();

        let all =
            update_requirements(HelmMode::Helm3, true, dir.path(), &[dep("postgres")]).unwrap();

        // Full list still reports both, but only the ad hoc entry is written
        assert_eq!(all.len(), 2);
        let meta = ChartMeta::load(dir.path()).unwrap().unwrap();
        assert_eq!(meta.dependencies.len(), 1);
        assert_eq!(meta.dependencies[0].name, "postgres");
    }

    #[test]
    fn test_update_requirements_merges_legacy_requirements_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Chart.yaml"),
            "apiVersion: v1\nname: app\nversion: 1.0.0\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("requirements.yaml"),
            "dependencies:\n- name: redis\n  repository: https://charts.example.com/redis\n",
        )
        .unwrap();

        let all =
            update_requirements(HelmMode::Helm3, false, dir.path(), &[dep("postgres")]).unwrap();

        assert_eq!(all.len(), 2);
        let meta = ChartMeta::load(dir.path()).unwrap().unwrap();
        assert_eq!(meta.dependencies.len(), 2);
        // Superseded by the inline list
        assert!(!dir.path().join("requirements.yaml").exists());
    }

    #[test]
    fn test_update_requirements_legacy_generation_writes_requirements() {
        let dir = tempfile::tempdir().unwrap();

        let all =
            update_requirements(HelmMode::Helm2, false, dir.path(), &[dep("postgres")]).unwrap();

        assert_eq!(all.len(), 1);
        let reqs = Requirements::load(dir.path()).unwrap().unwrap();
        assert_eq!(reqs.dependencies.len(), 1);
        assert_eq!(reqs.dependencies[0].name, "postgres");
    }

    #[test]
    fn test_update_requirements_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Chart.yaml"),
            "apiVersion: v2\nname: app\nversion: 1.0.0\n",
        )
        .unwrap();

        update_requirements(HelmMode::Helm3, false, dir.path(), &[dep("postgres")]).unwrap();
        let all =
            update_requirements(HelmMode::Helm3, false, dir.path(), &[dep("postgres")]).unwrap();

        assert_eq!(all.len(), 1, "re-merging the same dependency must dedupe");
        let meta = ChartMeta::load(dir.path()).unwrap().unwrap();
        assert_eq!(meta.dependencies.len(), 1);
    }
}
