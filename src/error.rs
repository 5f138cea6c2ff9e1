//src/error.rs

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a pipeline run.
///
/// Per-batch search failures are *not* represented here: they are collected as
/// [`crate::search::BatchOutcome`] values so one bad batch never aborts the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failure to open sequence: {0} does not exist")]
    InputNotFound(PathBuf),

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("could not write combined results to {path}: {source}")]
    Merge {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not build search worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
