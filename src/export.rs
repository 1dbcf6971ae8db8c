//! Output formats for merged or individual stats records.
//!
//! - Chrome/catapult trace events, viewable in `chrome://tracing` or Perfetto.
//! - LNT `submit` objects for performance tracking.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::DateTime;
use serde::Serialize;

use crate::error::{Result, StatsError};
use crate::job::{Job, MetricValue, StatsRecord};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A catapult "complete" event covering one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub name: String,
    pub cat: String,
    pub ph: &'static str,
    pub pid: u64,
    pub tid: u32,
    pub ts: u64,
    pub dur: u64,
    pub args: Vec<String>,
}

/// Machine and run details of an LNT submission.
#[derive(Debug, Clone)]
pub struct LntConfig {
    pub machine_name: String,
    pub machine_info: BTreeMap<String, String>,
    pub order: String,
    pub tag: String,
    pub run_info: BTreeMap<String, String>,
}

impl Default for LntConfig {
    fn default() -> Self {
        Self {
            machine_name: "localhost".to_string(),
            machine_info: BTreeMap::new(),
            order: "0".to_string(),
            tag: "swift-compile".to_string(),
            run_info: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LntSubmission {
    pub machine: LntMachine,
    pub run: LntRun,
    pub tests: Vec<LntTest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LntMachine {
    pub name: String,
    pub info: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct LntRun {
    #[serde(rename = "Start Time")]
    pub start_time: String,
    #[serde(rename = "End Time")]
    pub end_time: String,
    #[serde(rename = "Info")]
    pub info: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LntTest {
    pub data: Vec<MetricValue>,
    pub info: BTreeMap<String, String>,
    pub name: String,
}

/// LNT metric type for a stats key.
pub fn pick_lnt_metric_suffix(metric: &str) -> &'static str {
    if metric.contains("BytesOutput") {
        "code_size"
    } else if metric.contains("RSS") || metric.contains("BytesAllocated") {
        "mem"
    } else {
        "compile"
    }
}

fn format_micros(micros: u64) -> Result<String> {
    let time = i64::try_from(micros)
        .ok()
        .and_then(DateTime::from_timestamp_micros)
        .ok_or(StatsError::TimestampOutOfRange(micros))?;
    Ok(time.format(TIME_FORMAT).to_string())
}

impl StatsRecord {
    pub fn to_trace_event(&self) -> TraceEvent {
        TraceEvent {
            name: self.module().to_string(),
            cat: self.kind().to_string(),
            ph: "X",
            pid: self.run_id(),
            tid: 1,
            ts: self.start_micros,
            dur: self.duration_micros,
            args: self.identity.args.iter().flat_map(|a| a.to_vec()).collect(),
        }
    }

    /// Start time as `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn start_timestr(&self) -> Result<String> {
        format_micros(self.start_micros)
    }

    /// End time as `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn end_timestr(&self) -> Result<String> {
        format_micros(self.end_micros())
    }

    pub fn to_lnt_submission(&self, config: &LntConfig) -> Result<LntSubmission> {
        let mut run_info = BTreeMap::from([
            ("run_order".to_string(), config.order.clone()),
            ("tag".to_string(), config.tag.clone()),
        ]);
        run_info.extend(config.run_info.clone());

        let tests = self
            .metrics
            .iter()
            .map(|(name, value)| LntTest {
                data: vec![*value],
                info: BTreeMap::new(),
                name: format!(
                    "{}.{}.{}.{}",
                    config.tag,
                    self.module(),
                    name,
                    pick_lnt_metric_suffix(name)
                ),
            })
            .collect();

        Ok(LntSubmission {
            machine: LntMachine {
                name: config.machine_name.clone(),
                info: config.machine_info.clone(),
            },
            run: LntRun {
                start_time: self.start_timestr()?,
                end_time: self.end_timestr()?,
                info: run_info,
            },
            tests,
        })
    }
}

/// Write one trace event per record as a JSON array.
pub fn write_trace_events<W: Write>(records: &[StatsRecord], writer: W) -> Result<()> {
    let events: Vec<TraceEvent> = records.iter().map(StatsRecord::to_trace_event).collect();
    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}
