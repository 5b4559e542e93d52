//! Error types for roster-core operations.
//!
//! Detection-path conditions (absent selectors, unextractable nodes) are not
//! errors - they surface as `Option`/empty observations. This enum covers the
//! host-facing seams: config, spool IO, socket setup.

use std::path::PathBuf;

/// All errors that can occur in roster-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Spool directory unavailable: {path}: {source}")]
    SpoolUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using TrackerError.
pub type Result<T> = std::result::Result<T, TrackerError>;
