//! Directory scanning: find stats files and profile directories under a
//! `-stats-output-dir` tree and load them into records.
//!
//! A scan never fails because of a single bad entry. Unreadable files,
//! malformed JSON and unreadable profile directories are logged and
//! skipped so one truncated file cannot hide the rest of a build.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::error::{Result, StatsError};
use crate::grammar::{match_profile_dir, match_stats_file, match_timer, JobFileName, TIMER_PREFIX};
use crate::job::{JobIdentity, MetricValue, ProfileRecord, StatsRecord};

/// Profile outputs with this suffix are rendered images, not data.
const NON_DATA_SUFFIX: &str = ".svg";

/// Filters and timer handling applied while loading.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Modules to load. Empty loads every module.
    pub select_module: HashSet<String>,
    /// Regex patterns; a metric (or profile file) is kept when any of them
    /// matches somewhere in its name. Empty keeps everything.
    pub select_stat: Vec<String>,
    /// Drop every `time.` metric.
    pub exclude_timers: bool,
    /// Strip the job arguments out of timer names so timers of different
    /// inputs share one key.
    pub merge_timers: bool,
}

impl ScanOptions {
    fn module_selected(&self, module: &str) -> bool {
        self.select_module.is_empty() || self.select_module.contains(module)
    }
}

/// Compiled form of [`ScanOptions::select_stat`].
#[derive(Debug)]
struct StatSelector(Option<Regex>);

impl StatSelector {
    fn new(patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self(None));
        }
        let pattern = patterns.join("|");
        match Regex::new(&pattern) {
            Ok(re) => Ok(Self(Some(re))),
            Err(source) => Err(StatsError::InvalidStatSelector { pattern, source }),
        }
    }

    fn is_selected(&self, name: &str) -> bool {
        self.0.as_ref().map_or(true, |re| re.is_match(name))
    }
}

fn check_root(root: &Path) -> Result<()> {
    if !root.exists() {
        return Err(StatsError::RootNotFound(root.to_path_buf()));
    }
    Ok(())
}

fn identity_from(name: JobFileName) -> JobIdentity {
    JobIdentity {
        kind: name.kind,
        run_id: name.run_id,
        module: name.fields.module,
        args: vec![name.fields.args],
    }
}

/// Load every stats file found anywhere under `root`.
///
/// The order of the returned records is unspecified.
pub fn scan_stats(root: &Path, opts: &ScanOptions) -> Result<Vec<StatsRecord>> {
    check_root(root)?;
    let selector = StatSelector::new(&opts.select_stat)?;

    let mut records = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), err);
                continue;
            }
        };
        // Symlinks are not followed by the walk, so ask the target.
        if !entry.path().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(name) = match_stats_file(file_name) else {
            trace!("Ignoring {}", entry.path().display());
            continue;
        };
        if !opts.module_selected(&name.fields.module) {
            continue;
        }

        match load_stats_file(entry.path(), name, &selector, opts) {
            Ok(record) => records.push(record),
            Err(err) => warn!("Skipping stats file {}: {}", entry.path().display(), err),
        }
    }

    info!("Loaded {} stats files from {}", records.len(), root.display());
    Ok(records)
}

fn load_stats_file(
    path: &Path,
    name: JobFileName,
    selector: &StatSelector,
    opts: &ScanOptions,
) -> Result<StatsRecord> {
    let contents = fs::read_to_string(path)?;
    let json: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&contents)?;

    let mut duration_micros = 1;
    let mut metrics = BTreeMap::new();
    for (key, value) in json {
        if !selector.is_selected(&key) {
            continue;
        }
        if opts.exclude_timers && key.starts_with(TIMER_PREFIX) {
            continue;
        }
        let Some(mut value) = MetricValue::from_json(&value) else {
            debug!("Ignoring non-numeric metric {} in {}", key, path.display());
            continue;
        };

        let mut key = key;
        if let Some(timer) = match_timer(&key) {
            // Timers are recorded in seconds.
            let micros = (value.as_f64() * 1_000_000.0) as i64;
            value = MetricValue::Int(micros);
            if timer.kind == name.kind && timer.is_wall() {
                duration_micros = u64::try_from(micros).unwrap_or(0).max(1);
            }
            if opts.merge_timers {
                key = timer.merged_key();
            }
        }
        metrics.insert(key, value);
    }

    debug!("Loaded {} metrics from {}", metrics.len(), path.display());
    Ok(StatsRecord {
        start_micros: name.start_micros,
        duration_micros,
        identity: identity_from(name),
        metrics,
    })
}

/// Load every profile directory found anywhere under `root`.
///
/// Only `select_module` and `select_stat` of `opts` apply here.
pub fn scan_profiles(root: &Path, opts: &ScanOptions) -> Result<Vec<ProfileRecord>> {
    check_root(root)?;
    let selector = StatSelector::new(&opts.select_stat)?;

    let mut records = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.path().is_dir() {
            continue;
        }
        let Some(dir_name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(name) = match_profile_dir(dir_name) else {
            continue;
        };
        if !opts.module_selected(&name.fields.module) {
            continue;
        }

        match find_profiles_in(entry.path(), &selector) {
            Ok(profiles) => records.push(ProfileRecord {
                identity: identity_from(name),
                profiles,
            }),
            Err(err) => warn!(
                "Skipping profile directory {}: {}",
                entry.path().display(),
                err
            ),
        }
    }

    info!(
        "Loaded {} profile directories from {}",
        records.len(),
        root.display()
    );
    Ok(records)
}

fn find_profiles_in(
    dir: &Path,
    selector: &StatSelector,
) -> Result<BTreeMap<String, BTreeMap<String, PathBuf>>> {
    let mut profiles: BTreeMap<String, BTreeMap<String, PathBuf>> = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(err) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), err);
                continue;
            }
        };
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.ends_with(NON_DATA_SUFFIX) || !selector.is_selected(file_name) {
            continue;
        }
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Skipping {}: {}", path.display(), err);
                continue;
            }
        };
        if !metadata.is_file() || metadata.len() == 0 {
            continue;
        }

        let counter = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string();
        let profile_type = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        profiles
            .entry(profile_type)
            .or_default()
            .insert(counter, path.clone());
    }
    Ok(profiles)
}
