//! Typed errors
//!
//! Most functions return `anyhow::Result` with context attached at the call
//! site. The variants here are the conditions a caller (or a test) needs to
//! tell apart, recoverable with `err.downcast_ref::<ConfigError>()`.

use std::path::PathBuf;
use thiserror::Error;

/// Problems found while building or validating a pipeline.
///
/// All of these are raised before any job runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown job '{0}'")]
    UnknownJob(String),

    #[error("Job '{0}' is registered twice")]
    DuplicateJob(String),

    #[error("Job '{job}' declares reserved parameter '{param}'")]
    ReservedParameter { job: String, param: String },

    #[error("Job '{job}' is missing required parameter '{param}'")]
    MissingParameter { job: String, param: String },

    #[error("Job '{job}' was given unknown parameter '{param}'")]
    UnknownParameter { job: String, param: String },

    #[error("Job '{job}' parameter '{param}' references missing file {path:?}")]
    MissingFile {
        job: String,
        param: String,
        path: PathBuf,
    },

    #[error("Malformed job list entry: {0}")]
    MalformedEntry(String),

    #[error("Job '{job}' parameter '{param}': {reason}")]
    InvalidParameter {
        job: String,
        param: String,
        reason: String,
    },
}

/// Failures raised by a job while it runs. These abort the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("Vulnerability function '{id}' not found in set '{set}'")]
    UnknownFunction { set: String, id: String },

    #[error("Vulnerability set '{0}' has no linked exposure column")]
    UnlinkedSet(String),

    #[error("Vulnerability set '{0}' is not loaded")]
    UnknownSet(String),

    #[error("Invalid intensity measure '{column}' for vulnerability set '{set}'")]
    MissingIntensity { set: String, column: String },

    #[error("Exposure column '{0}' not found")]
    MissingColumn(String),

    #[error("Column '{column}' has {actual} rows, exposure has {expected} sites")]
    RowCountMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("No exposure loaded")]
    NoExposure,

    #[error("Transport failure on rank {rank}: {reason}")]
    Transport { rank: usize, reason: String },
}
