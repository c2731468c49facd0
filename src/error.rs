//! Error types for the archive client, the ICF pipeline and configuration loading.
//!
//! Every workflow error is reported to the operator as a log line and never ends the
//! session. Only [`ConfigError`] is fatal, and only at startup.

use reqwest::StatusCode;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("archive server rejected the credentials ({0})")]
    Rejected(StatusCode),
    #[error("archive server unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("study search request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("study search returned {0}")]
    Status(StatusCode),
    #[error("failed to fetch details of study {study_id}: {reason}")]
    Detail { study_id: String, reason: String },
    #[error("unexpected search response: {0}")]
    Decode(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("archive download of study {study_id} failed: {source}")]
    Request {
        study_id: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("archive download of study {study_id} returned {status}")]
    Status { study_id: String, status: StatusCode },
    #[error("I/O error on {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to unpack {path}: {source}", path = path.display())]
    Unpack {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error(
        "expected exactly one directory in {path}, found {found}",
        path = path.display()
    )]
    Layout { path: PathBuf, found: usize },
}

impl ExportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExportError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}", program = program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{subcommand} exited with {}", describe_code(code))]
    Failed {
        subcommand: String,
        code: Option<i32>,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "a signal".to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config file found, please create one of: {}", list_paths(searched))]
    NotFound { searched: Vec<PathBuf> },
    #[error("failed to read {path}: {source}", path = path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}", path = path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn list_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
