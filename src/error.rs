// Error types for Aperture
// One enum per concern, built with thiserror

use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading or reading the API contract. Fatal to a run.
#[derive(Error, Debug)]
pub enum ContractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("document is neither valid JSON nor YAML: {0}")]
    Parse(String),

    #[error("invalid contract: {0}")]
    Invalid(String),
}

/// Failures while loading the identity pool. Fatal to a run.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("identity at position {0} has an empty name")]
    EmptyName(usize),

    #[error("identity name '{0}' is declared more than once")]
    DuplicateIdentity(String),
}

/// Failures while building or dispatching a single request.
///
/// These never abort a scan: the runner turns them into CONTROL_FAILED or
/// POTENTIAL records.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("missing required path params for {path}: {}", .names.join(", "))]
    MissingPathParams { path: String, names: Vec<String> },

    #[error("path value {segment:?} for {path} is a dot segment")]
    DotSegment { path: String, segment: String },

    #[error("missing required query param {0}")]
    MissingQueryParam(String),

    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    #[error("failed to serialize request body: {0}")]
    Body(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures while writing results.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Json(#[from] serde_json::Error),
}
