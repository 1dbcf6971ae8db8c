//! Error type shared by the scanning, merging and export code.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the jobstats library.
///
/// Per-file problems found while scanning (unreadable files, malformed
/// JSON) are not errors: the scanner logs them and moves on.
#[derive(Debug, Error)]
pub enum StatsError {
    /// The directory handed to a scan does not exist.
    #[error("stats directory not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// A `--select-stat` pattern did not compile.
    #[error("invalid stat selector '{pattern}': {source}")]
    InvalidStatSelector {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A merge policy name other than `sum`, `min` or `max`.
    #[error("unknown merge policy '{0}' (expected one of: sum, min, max)")]
    UnknownMergePolicy(String),

    /// Incrementality is undefined for a driver that neither ran nor skipped jobs.
    #[error("driver job for module '{module}' recorded no ran or skipped jobs")]
    NoDriverJobs { module: String },

    /// A start or end time that chrono cannot represent.
    #[error("timestamp {0}us is out of range")]
    TimestampOutOfRange(u64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StatsError>;
