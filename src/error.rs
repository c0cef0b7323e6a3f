//! Error types for table parsing, comparison, and job orchestration.
//!
//! The taxonomy follows the propagation policy of the crate: anomalies in
//! individual table lines are logged and skipped at the parse site, while
//! anything that would silently produce a wrong or partial experiment
//! result (missing scores, inconsistent recovery state, unknown test
//! identifiers) surfaces as one of these variants and aborts the
//! enclosing operation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by traitfold parsers and orchestration.
#[derive(Debug, Error)]
pub enum Error {
    /// File I/O error with path context.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path that caused the error.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Malformed trait table or tree (missing header, duplicate columns).
    #[error("format error: {0}")]
    Format(String),

    /// A trait or metadata key was assigned twice for one entry.
    #[error("entry '{entity}' already has a value for '{key}'")]
    DuplicateKey { entity: String, key: String },

    /// Two entries share no traits usable by the requested metric.
    #[error("no traits shared between '{a}' and '{b}'")]
    NoOverlap { a: String, b: String },

    /// Unknown comparison metric name (CLI boundary only).
    #[error("metric '{0}' is invalid (expected correlation, disimilarity, or positivepred)")]
    InvalidMetric(String),

    /// A requested identifier is absent from its source (tree leaves or
    /// observed table).
    #[error("entity '{0}' not found")]
    UnknownEntity(String),

    /// Partition 0 was reloaded but a later partition directory is
    /// missing, indicating a corrupted or truncated prior run.
    #[error("partition {index} missing under {}: refusing to mix reloaded and fresh partitions", dir.display())]
    PartialLoad { dir: PathBuf, index: usize },

    /// The prediction job finished but a held-out entity has no score.
    #[error("no score resolved for entity '{entity}'")]
    IncompleteResult { entity: String },

    /// Predicted output not yet present; the job may still be running.
    /// Callers may wait on the job and retry once.
    #[error("predicted output not ready: {}", path.display())]
    ResultsNotReady { path: PathBuf },

    /// Batch scheduler invocation failed (bsub/bjobs not found, non-zero
    /// exit, undecodable output).
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl Error {
    /// Attach path context to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Result type alias for traitfold operations.
pub type Result<T> = std::result::Result<T, Error>;
