// src/error.rs

//! Error types for the build worker
//!
//! One variant per failure class of a build execution. Whether a variant is
//! fatal is decided by the step that raises it; the worker turns every fatal
//! error into "skip to cleanup".

use std::path::PathBuf;
use thiserror::Error;

use crate::workspace::ManifestError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a build execution
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unusable configuration; execution never starts
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Manifest missing, unreadable or without any image
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Helper container could neither be confirmed running nor started
    #[error("Helper container unavailable: {0}")]
    ContainerUnavailable(String),

    /// Process launch or join failed
    #[error("Failed to execute `{command}`: {source}")]
    Execution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Streaming process output into its sink failed
    #[error("Failed to capture output of `{command}`: {source}")]
    OutputSink {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A mandatory in-container staging step failed
    #[error("Staging failed: {0}")]
    StagingFailed(String),

    /// The analyze sub-command exited non-zero
    #[error("Image analysis failed with exit code {0}")]
    AnalysisFailed(i32),

    /// Gate or query requested before a successful analysis
    #[error("Images have not been analyzed in this execution")]
    NotAnalyzed,

    /// The gate report could not be written
    #[error("Failed to write report {path}: {source}")]
    ReportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Report directory missing or the archiver rejected it
    #[error("Report archive unavailable: {0}")]
    ArchiveUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short class name used in the execution log and the verdict record
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "ConfigInvalid",
            Self::Manifest(_) => "ManifestError",
            Self::ContainerUnavailable(_) => "ContainerUnavailable",
            Self::Execution { .. } => "ExecutionError",
            Self::OutputSink { .. } => "ExecutionError",
            Self::StagingFailed(_) => "StagingFailed",
            Self::AnalysisFailed(_) => "AnalysisFailed",
            Self::NotAnalyzed => "NotAnalyzed",
            Self::ReportWriteFailed { .. } => "ReportWriteFailed",
            Self::ArchiveUnavailable(_) => "ArchiveUnavailable",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
        }
    }
}
