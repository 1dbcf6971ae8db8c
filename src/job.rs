//! In-memory records for one compiler job.
//!
//! A [`StatsRecord`] holds the timing and counters a job wrote to its
//! stats file, a [`ProfileRecord`] the sampled profiles it wrote to its
//! profile directory. Records are values: merging, prefixing and dividing
//! return new records and leave the inputs alone.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::str::FromStr;

use rand::RngCore;
use serde::{Serialize, Serializer};

use crate::error::{Result, StatsError};

/// Counter holding the number of sub-jobs a driver actually ran.
pub const DRIVER_JOBS_RUN: &str = "Driver.NumDriverJobsRun";
/// Counter holding the number of sub-jobs a driver skipped as up to date.
pub const DRIVER_JOBS_SKIPPED: &str = "Driver.NumDriverJobsSkipped";
/// Kind and module given to a merged record whose inputs disagree.
pub const MERGED: &str = "<merged>";
/// Upper bound (inclusive) for generated run ids.
pub const MAX_RUN_ID: u64 = 1_000_000_000;

/// Draw a fresh run id for a derived record.
pub fn next_run_id(rng: &mut dyn RngCore) -> u64 {
    rng.next_u64() % (MAX_RUN_ID + 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKind {
    Driver,
    Frontend,
    Other(String),
}

impl JobKind {
    pub fn as_str(&self) -> &str {
        match self {
            JobKind::Driver => "driver",
            JobKind::Frontend => "frontend",
            JobKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for JobKind {
    fn from(s: &str) -> Self {
        match s {
            "driver" => JobKind::Driver,
            "frontend" => JobKind::Frontend,
            other => JobKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Positional arguments of a job. `output` is empty when the job had none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobArgs {
    pub input: String,
    pub triple: String,
    pub output: String,
    pub opt_level: String,
}

impl JobArgs {
    pub fn to_vec(&self) -> Vec<String> {
        vec![
            self.input.clone(),
            self.triple.clone(),
            self.output.clone(),
            self.opt_level.clone(),
        ]
    }
}

/// Identity shared by stats and profile records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobIdentity {
    pub kind: JobKind,
    /// Random label, not a process id.
    pub run_id: u64,
    pub module: String,
    /// One entry per job the record covers; merged records concatenate these.
    pub args: Vec<JobArgs>,
}

/// Accessors common to every record kind.
pub trait Job {
    fn identity(&self) -> &JobIdentity;

    fn kind(&self) -> &JobKind {
        &self.identity().kind
    }

    fn module(&self) -> &str {
        &self.identity().module
    }

    fn run_id(&self) -> u64 {
        self.identity().run_id
    }

    fn is_driver_job(&self) -> bool {
        self.identity().kind == JobKind::Driver
    }

    fn is_frontend_job(&self) -> bool {
        self.identity().kind == JobKind::Frontend
    }
}

/// A single counter or timer value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    /// Convert a JSON number, preferring the integer form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        value
            .as_i64()
            .map(MetricValue::Int)
            .or_else(|| value.as_f64().map(MetricValue::Float))
    }

    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Int(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            MetricValue::Int(v) => v == 0,
            MetricValue::Float(v) => v == 0.0,
        }
    }

    /// Integer sums saturate at `i64::MAX`. Saturation only commutes with
    /// reordering when every operand is non-negative, which holds for
    /// compiler counters and timers.
    pub fn sum(self, other: Self) -> Self {
        match (self, other) {
            (MetricValue::Int(a), MetricValue::Int(b)) => MetricValue::Int(a.saturating_add(b)),
            (a, b) => MetricValue::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn max(self, other: Self) -> Self {
        match (self, other) {
            (MetricValue::Int(a), MetricValue::Int(b)) => MetricValue::Int(a.max(b)),
            (a, b) => MetricValue::Float(a.as_f64().max(b.as_f64())),
        }
    }

    pub fn min(self, other: Self) -> Self {
        match (self, other) {
            (MetricValue::Int(a), MetricValue::Int(b)) => MetricValue::Int(a.min(b)),
            (a, b) => MetricValue::Float(a.as_f64().min(b.as_f64())),
        }
    }

    /// Integers floor-divide, floats divide.
    pub fn divided_by(self, n: NonZeroU64) -> Self {
        match self {
            MetricValue::Int(v) => {
                MetricValue::Int(v.div_euclid(i64::try_from(n.get()).unwrap_or(i64::MAX)))
            }
            MetricValue::Float(v) => MetricValue::Float(v / n.get() as f64),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// How two values for the same metric are combined when records merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Assumes non-negative values, like `Min`.
    #[default]
    Sum,
    /// Minimum of the nonzero values. Zero doubles as "not recorded" in
    /// compiler counters, so a plain minimum would prefer a missing
    /// measurement over a real one. Assumes non-negative values.
    Min,
    Max,
}

impl MergePolicy {
    pub fn apply(self, a: MetricValue, b: MetricValue) -> MetricValue {
        match self {
            MergePolicy::Sum => a.sum(b),
            MergePolicy::Max => a.max(b),
            MergePolicy::Min => {
                if !a.is_zero() && !b.is_zero() {
                    a.min(b)
                } else {
                    a.max(b)
                }
            }
        }
    }
}

impl FromStr for MergePolicy {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(MergePolicy::Sum),
            "min" => Ok(MergePolicy::Min),
            "max" => Ok(MergePolicy::Max),
            other => Err(StatsError::UnknownMergePolicy(other.to_string())),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergePolicy::Sum => "sum",
            MergePolicy::Min => "min",
            MergePolicy::Max => "max",
        };
        f.write_str(name)
    }
}

/// Timing and counters of one job, as loaded from a stats file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRecord {
    #[serde(flatten)]
    pub identity: JobIdentity,
    pub start_micros: u64,
    pub duration_micros: u64,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl Job for StatsRecord {
    fn identity(&self) -> &JobIdentity {
        &self.identity
    }
}

impl StatsRecord {
    pub fn end_micros(&self) -> u64 {
        self.start_micros.saturating_add(self.duration_micros)
    }

    fn driver_counter(&self, name: &str) -> MetricValue {
        assert!(
            self.is_driver_job(),
            "{name} requested from a {} job for module {}",
            self.identity.kind,
            self.identity.module
        );
        self.metrics
            .get(name)
            .copied()
            .unwrap_or(MetricValue::Int(0))
    }

    /// Sub-jobs the driver ran.
    ///
    /// # Panics
    ///
    /// Panics if this is not a driver job.
    pub fn driver_jobs_ran(&self) -> MetricValue {
        self.driver_counter(DRIVER_JOBS_RUN)
    }

    /// Sub-jobs the driver skipped.
    ///
    /// # Panics
    ///
    /// Panics if this is not a driver job.
    pub fn driver_jobs_skipped(&self) -> MetricValue {
        self.driver_counter(DRIVER_JOBS_SKIPPED)
    }

    /// Ran plus skipped sub-jobs.
    ///
    /// # Panics
    ///
    /// Panics if this is not a driver job.
    pub fn driver_jobs_total(&self) -> MetricValue {
        self.driver_jobs_ran().sum(self.driver_jobs_skipped())
    }

    /// Percentage of sub-jobs that actually ran, rounded to two decimals.
    ///
    /// Returns [`StatsError::NoDriverJobs`] when the driver neither ran nor
    /// skipped anything.
    ///
    /// # Panics
    ///
    /// Panics if this is not a driver job.
    pub fn incrementality_percentage(&self) -> Result<f64> {
        let ran = self.driver_jobs_ran().as_f64();
        let total = self.driver_jobs_total().as_f64();
        if total == 0.0 {
            return Err(StatsError::NoDriverJobs {
                module: self.identity.module.clone(),
            });
        }
        let pct = ran / total * 100.0;
        Ok((pct * 100.0).round() / 100.0)
    }

    /// Combine two records into one covering both.
    ///
    /// Metrics present on both sides are combined with `policy`, metrics on
    /// one side are copied. The result spans from the earlier start to the
    /// later end and gets a fresh run id.
    pub fn merged_with(
        &self,
        other: &StatsRecord,
        policy: MergePolicy,
        rng: &mut dyn RngCore,
    ) -> StatsRecord {
        let mut metrics = self.metrics.clone();
        for (name, value) in &other.metrics {
            metrics
                .entry(name.clone())
                .and_modify(|cur| *cur = policy.apply(*cur, *value))
                .or_insert(*value);
        }

        let kind = if self.identity.kind == other.identity.kind {
            self.identity.kind.clone()
        } else {
            JobKind::Other(MERGED.to_string())
        };
        let module = if self.identity.module == other.identity.module {
            self.identity.module.clone()
        } else {
            MERGED.to_string()
        };

        let start_micros = self.start_micros.min(other.start_micros);
        let end_micros = self.end_micros().max(other.end_micros());

        let mut args = self.identity.args.clone();
        args.extend(other.identity.args.iter().cloned());

        StatsRecord {
            identity: JobIdentity {
                kind,
                run_id: next_run_id(rng),
                module,
                args,
            },
            start_micros,
            duration_micros: end_micros - start_micros,
            metrics,
        }
    }

    /// Rename every metric to `<prefix>.<name>`.
    pub fn prefixed_by(&self, prefix: &str, rng: &mut dyn RngCore) -> StatsRecord {
        let metrics = self
            .metrics
            .iter()
            .map(|(name, value)| (format!("{prefix}.{name}"), *value))
            .collect();
        self.derive(metrics, rng)
    }

    /// Divide every metric by `n`. Timing and identity are left as is.
    pub fn divided_by(&self, n: NonZeroU64, rng: &mut dyn RngCore) -> StatsRecord {
        let metrics = self
            .metrics
            .iter()
            .map(|(name, value)| (name.clone(), value.divided_by(n)))
            .collect();
        self.derive(metrics, rng)
    }

    fn derive(&self, metrics: BTreeMap<String, MetricValue>, rng: &mut dyn RngCore) -> StatsRecord {
        StatsRecord {
            identity: JobIdentity {
                run_id: next_run_id(rng),
                ..self.identity.clone()
            },
            start_micros: self.start_micros,
            duration_micros: self.duration_micros,
            metrics,
        }
    }
}

/// Profile files of one job, keyed by profile type (file extension) and
/// then counter name (file stem).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRecord {
    #[serde(flatten)]
    pub identity: JobIdentity,
    pub profiles: BTreeMap<String, BTreeMap<String, PathBuf>>,
}

impl Job for ProfileRecord {
    fn identity(&self) -> &JobIdentity {
        &self.identity
    }
}
