//! Name grammars for the files a compiler writes into `-stats-output-dir`.
//!
//! Every job writes `stats-<start>-<subsystem>-<kind>-<args>-<runid>.json`
//! and optionally a `profile-...dir` directory with the same fields. The
//! `<args>` part is the job's positional arguments,
//! `module-input-triple-output-opt`, and the same argument string is
//! embedded in the timer metric names inside the JSON.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::job::{JobArgs, JobKind};

/// `module-input-triple-output-opt`. Only `output` may be empty.
const ARGS_PATTERN: &str = concat!(
    r"(?P<module>[^-]+)-(?P<input>[^-]+)-(?P<triple>[^-]+)",
    r"-(?P<out>[^-]*)-(?P<opt>[^-]+)"
);

/// Prefix shared by every timer metric name.
pub const TIMER_PREFIX: &str = "time.";

/// Timer kind that carries a job's wall-clock duration.
pub const WALL_TIMER: &str = "wall";

static ARGS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{ARGS_PATTERN}$")).expect("Invalid argument regex pattern")
});

static TIMER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^time\.(?P<subsystem>\w+)-(?P<kind>\w+)\.{ARGS_PATTERN}\.(?P<timer>\w+)$"
    ))
    .expect("Invalid timer regex pattern")
});

static STATS_FILE_RE: LazyLock<Regex> = LazyLock::new(|| job_name_regex("stats", "json"));

static PROFILE_DIR_RE: LazyLock<Regex> = LazyLock::new(|| job_name_regex("profile", "dir"));

fn job_name_regex(prefix: &str, extension: &str) -> Regex {
    Regex::new(&format!(
        r"^{prefix}-(?P<start>\d+)-(?P<subsystem>\w+)-(?P<kind>\w+)-{ARGS_PATTERN}-(?P<runid>\d+)(?:-(?P<suffix>.*))?\.{extension}$"
    ))
    .expect("Invalid job file regex pattern")
}

fn group<'h>(caps: &Captures<'h>, name: &str) -> Option<&'h str> {
    caps.name(name).map(|m| m.as_str())
}

fn args_from_captures(caps: &Captures<'_>) -> Option<ArgFields> {
    Some(ArgFields {
        module: group(caps, "module")?.to_string(),
        args: JobArgs {
            input: group(caps, "input")?.to_string(),
            triple: group(caps, "triple")?.to_string(),
            output: group(caps, "out")?.to_string(),
            opt_level: group(caps, "opt")?.to_string(),
        },
    })
}

/// The module plus positional arguments of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgFields {
    pub module: String,
    pub args: JobArgs,
}

impl fmt::Display for ArgFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            self.module, self.args.input, self.args.triple, self.args.output, self.args.opt_level
        )
    }
}

/// Match a bare argument string such as `Foo-a.swift-x86_64_apple_macosx-a.o-O`.
pub fn match_args(s: &str) -> Option<ArgFields> {
    let caps = ARGS_RE.captures(s)?;
    args_from_captures(&caps)
}

/// A timer entry found among a job's metrics, e.g.
/// `time.swift-frontend.Foo-a.swift-x86_64_apple_macosx-a.o-O.wall`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerName {
    pub subsystem: String,
    pub kind: JobKind,
    pub fields: ArgFields,
    pub timer: String,
}

impl TimerName {
    pub fn is_wall(&self) -> bool {
        self.timer == WALL_TIMER
    }

    /// The metric name with the job arguments dropped, so timers from
    /// different inputs of the same job kind collapse onto one key.
    pub fn merged_key(&self) -> String {
        format!(
            "{TIMER_PREFIX}{}-{}.{}",
            self.subsystem, self.kind, self.timer
        )
    }
}

pub fn match_timer(s: &str) -> Option<TimerName> {
    let caps = TIMER_RE.captures(s)?;
    Some(TimerName {
        subsystem: group(&caps, "subsystem")?.to_string(),
        kind: JobKind::from(group(&caps, "kind")?),
        fields: args_from_captures(&caps)?,
        timer: group(&caps, "timer")?.to_string(),
    })
}

/// Identity fields carried by a stats file or profile directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFileName {
    pub start_micros: u64,
    pub subsystem: String,
    pub kind: JobKind,
    pub fields: ArgFields,
    /// Random disambiguator, not a process id.
    pub run_id: u64,
    pub suffix: Option<String>,
}

impl JobFileName {
    fn from_captures(caps: &Captures<'_>) -> Option<Self> {
        Some(Self {
            start_micros: group(caps, "start")?.parse().ok()?,
            subsystem: group(caps, "subsystem")?.to_string(),
            kind: JobKind::from(group(caps, "kind")?),
            fields: args_from_captures(caps)?,
            run_id: group(caps, "runid")?.parse().ok()?,
            suffix: group(caps, "suffix").map(str::to_string),
        })
    }

    fn render(&self, prefix: &str, extension: &str) -> String {
        let suffix = self
            .suffix
            .as_deref()
            .map(|s| format!("-{s}"))
            .unwrap_or_default();
        format!(
            "{prefix}-{}-{}-{}-{}-{}{suffix}.{extension}",
            self.start_micros, self.subsystem, self.kind, self.fields, self.run_id
        )
    }

    pub fn stats_file_name(&self) -> String {
        self.render("stats", "json")
    }

    pub fn profile_dir_name(&self) -> String {
        self.render("profile", "dir")
    }
}

/// Match a stats file name. Returns `None` for anything else in the directory.
pub fn match_stats_file(s: &str) -> Option<JobFileName> {
    let caps = STATS_FILE_RE.captures(s)?;
    JobFileName::from_captures(&caps)
}

/// Match a profile directory name.
pub fn match_profile_dir(s: &str) -> Option<JobFileName> {
    let caps = PROFILE_DIR_RE.captures(s)?;
    JobFileName::from_captures(&caps)
}
