//! jobstats library - load and combine the per-job statistics a compiler
//! writes with `-stats-output-dir`.
//!
//! # Modules
//!
//! - [`grammar`] - file, directory and timer name grammars
//! - [`job`] - stats/profile records and their merge operations
//! - [`scan`] - directory scanning
//! - [`merge`] - reducing many records to one
//! - [`export`] - catapult trace events and LNT submissions
//!
//! # Example
//!
//! ```no_run
//! use jobstats::{merge_all, scan_stats, MergeOptions, ScanOptions};
//! use std::path::Path;
//!
//! let records = scan_stats(Path::new("./stats"), &ScanOptions::default())?;
//! let merged = merge_all(records, &MergeOptions::default(), &mut rand::rng());
//! if let Some(merged) = merged {
//!     println!("{}", serde_json::to_string_pretty(&merged.metrics)?);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod error;
pub mod export;
pub mod grammar;
pub mod job;
pub mod merge;
pub mod scan;

pub use error::StatsError;
pub use export::{write_trace_events, LntConfig, LntSubmission, TraceEvent};
pub use job::{
    Job, JobArgs, JobIdentity, JobKind, MergePolicy, MetricValue, ProfileRecord, StatsRecord,
};
pub use merge::{merge_all, MergeOptions};
pub use scan::{scan_profiles, scan_stats, ScanOptions};
