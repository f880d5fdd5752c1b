//! Error types for the chartification pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    // ============ Input Errors ============
    #[error("no repository entry found for \"{name}\". please `helm repo add` it!")]
    RepositoryNotFound { name: String },

    #[error("unexpected format of `helm repo list` at line {line_num} \"{line}\" in:\n{output}")]
    RepoListParse {
        line_num: usize,
        line: String,
        output: String,
    },

    #[error("invalid dependency \"{spec}\": expected alias=repoOrPath/chart:version")]
    InvalidDependency { spec: String },

    #[error("patch {index}: both \"path\" and \"patch\" are set, only one is allowed")]
    PatchSourceConflict { index: usize },

    #[error("patch {index}: either \"path\" or \"patch\" must be set")]
    PatchSourceMissing { index: usize },

    #[error("patch {index}: JSON patches require a target specification")]
    JsonPatchMissingTarget { index: usize },

    #[error("either \"path\" or \"patch\" must be set in {path}")]
    JsonPatchFileIncomplete { path: PathBuf },

    #[error("inject-flags must be in the form of key1=value1[,key2=value2,...]: {flag}")]
    InvalidInjectFlag { flag: String },

    #[error("--set is not supported for kustomize-based sources, use -f/--values instead")]
    KustomizeSetValuesUnsupported,

    // ============ Delegate Failures ============
    #[error("command \"{program}\" not found in PATH: {message}")]
    BinaryNotFound { program: String, message: String },

    #[error("command failed: {message}\n\nCOMMAND:\n{command}\n\nOUTPUT:\n{output}")]
    CommandFailed {
        message: String,
        command: String,
        output: String,
    },

    // ============ Invariant Violations ============
    #[error("invalid state: no files rendered")]
    NoFilesRendered,

    #[error("{count} additional entries found after unpacking the archive under {dir}. This is very strange:\n{entries}")]
    UnexpectedArchiveLayout {
        count: usize,
        dir: PathBuf,
        entries: String,
    },

    #[error("unable to find semver info in {version}")]
    NoSemverInfo { version: String },

    // ============ Parse & IO ============
    #[error("parsing yaml from {path}: {source}")]
    YamlFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("{path}: {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Attach the offending path to a raw IO error
    pub fn path_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PathIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
