//! jobstats: summarize the directories written by `swiftc -stats-output-dir`.

use std::fs::File;
use std::io::{self, Write};
use std::num::NonZeroU64;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use jobstats::{
    merge_all, scan_profiles, scan_stats, write_trace_events, Job, LntConfig, MergeOptions,
    MergePolicy, ProfileRecord, ScanOptions, StatsRecord,
};

#[derive(Parser)]
#[command(name = "jobstats")]
#[command(about = "Load, merge and export compiler job statistics")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SelectArgs {
    /// Stats directories to scan
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Only load these modules (repeatable)
    #[arg(long)]
    select_module: Vec<String>,

    /// Only keep stats matching this regex (repeatable)
    #[arg(long)]
    select_stat: Vec<String>,

    /// Drop all timer stats
    #[arg(long)]
    exclude_timers: bool,

    /// Merge timers of different inputs into one stat per job kind
    #[arg(long)]
    merge_timers: bool,
}

impl SelectArgs {
    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            select_module: self.select_module.iter().cloned().collect(),
            select_stat: self.select_stat.clone(),
            exclude_timers: self.exclude_timers,
            merge_timers: self.merge_timers,
        }
    }

    fn load_stats(&self) -> Result<Vec<StatsRecord>> {
        let opts = self.scan_options();
        let mut records = Vec::new();
        for dir in &self.dirs {
            records.extend(scan_stats(dir, &opts)?);
        }
        records.sort_by_key(|r| r.start_micros);
        Ok(records)
    }

    fn load_profiles(&self) -> Result<Vec<ProfileRecord>> {
        let opts = self.scan_options();
        let mut records = Vec::new();
        for dir in &self.dirs {
            records.extend(scan_profiles(dir, &opts)?);
        }
        Ok(records)
    }
}

#[derive(Args)]
struct MergeArgs {
    /// How to combine a stat present in several jobs: sum, min or max
    #[arg(long, default_value = "sum")]
    merge_by: MergePolicy,

    /// Merge each module separately, prefixing stats with the module name
    #[arg(long)]
    group_by_module: bool,

    /// Divide the merged stats by this count
    #[arg(long, default_value = "1")]
    divide_by: NonZeroU64,
}

impl MergeArgs {
    fn merge_options(&self, select: &SelectArgs) -> MergeOptions {
        MergeOptions {
            select_module: select.select_module.iter().cloned().collect(),
            group_by_module: self.group_by_module,
            merge_by: self.merge_by,
            divide_by: self.divide_by,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Emit one catapult trace event per job
    Catapult {
        #[command(flatten)]
        select: SelectArgs,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Merge all jobs into a single set of stats
    Merge {
        #[command(flatten)]
        select: SelectArgs,

        #[command(flatten)]
        merge: MergeArgs,

        /// Output format: json, table
        #[arg(short, long, default_value = "json")]
        format: String,
    },
    /// Merge all jobs and emit an LNT submission
    Lnt {
        #[command(flatten)]
        select: SelectArgs,

        #[command(flatten)]
        merge: MergeArgs,

        /// LNT machine name
        #[arg(long, default_value = "localhost")]
        machine: String,

        /// LNT run order
        #[arg(long, default_value = "0")]
        order: String,

        /// LNT tag, also the first component of every test name
        #[arg(long, default_value = "swift-compile")]
        tag: String,

        /// Extra run info as key=value (repeatable)
        #[arg(long, value_parser = parse_key_val)]
        run_info: Vec<(String, String)>,

        /// Extra machine info as key=value (repeatable)
        #[arg(long, value_parser = parse_key_val)]
        machine_info: Vec<(String, String)>,
    },
    /// Show how many sub-jobs each driver actually ran
    Incrementality {
        #[command(flatten)]
        select: SelectArgs,
    },
    /// List the profile files of each job
    Profiles {
        #[command(flatten)]
        select: SelectArgs,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected key=value, got '{s}'")),
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_catapult(select: &SelectArgs, output: Option<PathBuf>) -> Result<()> {
    let records = select.load_stats()?;
    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_trace_events(&records, file)?;
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write_trace_events(&records, &mut lock)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}

fn run_merge(select: &SelectArgs, merge: &MergeArgs, format: &str) -> Result<()> {
    let records = select.load_stats()?;
    let Some(merged) = merge_all(records, &merge.merge_options(select), &mut rand::rng()) else {
        warn!("No stats records to merge");
        return Ok(());
    };

    match format {
        "table" => {
            let rows: Vec<[String; 2]> = merged
                .metrics
                .iter()
                .map(|(name, value)| [name.clone(), value.to_string()])
                .collect();
            print_table(["stat", "value"], &rows);
        }
        _ => println!("{}", serde_json::to_string_pretty(&merged)?),
    }
    Ok(())
}

fn run_lnt(select: &SelectArgs, merge: &MergeArgs, config: &LntConfig) -> Result<()> {
    let records = select.load_stats()?;
    let Some(merged) = merge_all(records, &merge.merge_options(select), &mut rand::rng()) else {
        warn!("No stats records to submit");
        return Ok(());
    };
    let submission = merged.to_lnt_submission(config)?;
    println!("{}", serde_json::to_string_pretty(&submission)?);
    Ok(())
}

fn run_incrementality(select: &SelectArgs) -> Result<()> {
    let records = select.load_stats()?;
    let rows: Vec<[String; 4]> = records
        .iter()
        .filter(|r| r.is_driver_job())
        .filter_map(|r| match r.incrementality_percentage() {
            Ok(pct) => Some([
                r.module().to_string(),
                r.driver_jobs_ran().to_string(),
                r.driver_jobs_total().to_string(),
                format!("{pct:.2}"),
            ]),
            Err(e) => {
                warn!("Skipping driver job {}: {}", r.run_id(), e);
                None
            }
        })
        .collect();
    print_table(["module", "ran", "total", "incrementality %"], &rows);
    Ok(())
}

fn run_profiles(select: &SelectArgs) -> Result<()> {
    let records = select.load_profiles()?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

/// Print `rows` under `headers`. The first column is the name and is left
/// aligned; the rest hold numbers and are right aligned.
fn print_table<const N: usize>(headers: [&str; N], rows: &[[String; N]]) {
    let mut widths = headers.map(|h| h.chars().count());
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |cells: [&str; N]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(col, (cell, width))| match col {
                0 => format!("{cell:<width$}"),
                _ => format!("{cell:>width$}"),
            })
            .collect();
        line.join("  ").trim_end().to_string()
    };

    let rules = widths.map(|w| "=".repeat(w));
    println!("{}", render(headers));
    println!("{}", render(rules.each_ref().map(String::as_str)));
    for row in rows {
        println!("{}", render(row.each_ref().map(String::as_str)));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Catapult { select, output } => run_catapult(&select, output),
        Commands::Merge {
            select,
            merge,
            format,
        } => run_merge(&select, &merge, &format),
        Commands::Lnt {
            select,
            merge,
            machine,
            order,
            tag,
            run_info,
            machine_info,
        } => {
            let config = LntConfig {
                machine_name: machine,
                machine_info: machine_info.into_iter().collect(),
                order,
                tag,
                run_info: run_info.into_iter().collect(),
            };
            run_lnt(&select, &merge, &config)
        }
        Commands::Incrementality { select } => run_incrementality(&select),
        Commands::Profiles { select } => run_profiles(&select),
    }
}
