//! Error taxonomy for the bronze → silver pipeline.
//!
//! Every stage has its own enum so callers can branch on the failing stage;
//! [`PipelineError`] unifies them for the library entry points. Nothing here
//! retries: errors surface to whoever invoked the run.

use thiserror::Error;

use crate::config::OutputType;

/// Result type alias used by the library entry points.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure fetching the source dataset.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The endpoint answered with a non-success status code.
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// Timeout, connection failure or broken body.
    #[error("GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// The HTTP status code, when the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
        }
    }
}

/// The raw payload is not well-formed delimited text.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("payload has no header row")]
    MissingHeader,

    #[error("malformed CSV: {0}")]
    Csv(#[from] arrow::error::ArrowError),

    /// Two source headers map to the same normalized name.
    #[error("columns {first:?} and {second:?} both normalize to {normalized:?}")]
    ColumnCollision {
        first: String,
        second: String,
        normalized: String,
    },
}

/// Schema mapping could not be applied.
#[derive(Error, Debug)]
pub enum CastError {
    /// A mapping key matches none of the normalized columns.
    #[error("mapping key {key:?} matches no column; available columns: {available:?}")]
    UnmatchedMappingKey { key: String, available: Vec<String> },

    #[error("column {column:?}, row {row}: cannot cast {value:?} to {target}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
        target: OutputType,
    },

    /// Two output columns would carry the same name.
    #[error("output column {name:?} produced more than once")]
    DuplicateTarget { name: String },

    #[error("building cast batch: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// Object store read/write failure.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{op} {location} failed: {source}")]
    ObjectStore {
        op: &'static str,
        location: String,
        #[source]
        source: object_store::Error,
    },

    #[error("invalid object key {key:?}: {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: object_store::path::Error,
    },

    #[error("no raw objects under {bucket}/{prefix}")]
    NoRawObjects { bucket: String, prefix: String },

    #[error("configuring {backend} backend: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: object_store::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Check if this error represents a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectStore {
                source: object_store::Error::NotFound { .. },
                ..
            }
        )
    }
}

/// Invalid or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid source_url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("timeout_secs must be greater than zero")]
    ZeroTimeout,
}

/// Any failure of an ingest or transform run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("encoding parquet: {0}")]
    Encode(#[from] parquet::errors::ParquetError),

    #[error("arrow compute error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
