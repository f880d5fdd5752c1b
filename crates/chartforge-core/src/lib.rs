//! chartforge-core - Turn arbitrary Kubernetes packaging sources into
//! self-contained Helm charts
//!
//! Given a local or remote chart, a Kustomize project, or a loose set of
//! manifests, the pipeline normalizes the input into a staging directory,
//! merges dependency declarations, renders through the external templating
//! engine, applies patches via the overlay-build engine, rewrites
//! namespaces, runs post-render injectors, and guards the result against
//! double rendering. The staging directory is the only state between
//! stages, so the external tools always operate on real files.

pub mod archive;
pub mod chart;
pub mod deps;
pub mod error;
pub mod exec;
pub mod fsutil;
pub mod guard;
pub mod inject;
pub mod namespace;
pub mod normalize;
pub mod options;
pub mod patch;
pub mod pipeline;
pub mod render;
pub mod staging;

pub use chart::{CONTENT_DIRS, ChartMeta, Dependency, HelmMode, Requirements};
pub use error::{Error, Result};
pub use exec::{CommandOutput, CommandRunner, SystemRunner};
pub use inject::InjectOpts;
pub use options::{AdhocDependency, ChartifyOptions, Patch, PatchTarget};
pub use patch::{PatchOpts, PatchSummary};
pub use pipeline::{Chartifier, ENV_HELM3};
pub use render::{KustomizeBuildOpts, RenderOpts};
pub use staging::{ENV_DEBUG, ENV_WORK_DIR};
