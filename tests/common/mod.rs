//! Common test utilities for jobstats integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

pub const TRIPLE: &str = "x86_64_apple_macosx10.9";

/// Write a stats file the way `swiftc -stats-output-dir` names it.
pub fn write_stats_file(
    dir: &Path,
    start: u64,
    kind: &str,
    module: &str,
    input: &str,
    run_id: u64,
    stats: &Value,
) -> PathBuf {
    let output = if input == "all" {
        String::new()
    } else {
        format!("{input}.o")
    };
    let name = format!("stats-{start}-swift-{kind}-{module}-{input}-{TRIPLE}-{output}-O-{run_id}.json");
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(stats).expect("Failed to encode stats"))
        .expect("Failed to write stats file");
    path
}

/// Timer key for a frontend job's wall clock.
#[allow(dead_code)]
pub fn frontend_wall_timer(module: &str, input: &str) -> String {
    format!("time.swift-frontend.{module}-{input}-{TRIPLE}-{input}.o-O.wall")
}
