//! `driftsync watch`: run the change-detection engine on its own.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use driftsync_watcher::{watch_dir, WatchOptions};

/// Watch DIRECTORY for changes, dumping the changed paths to a unique file
/// in OUTPUTDIR every few seconds. OUTPUTDIR must not be under DIRECTORY.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directory tree to watch.
    pub directory: PathBuf,

    /// Directory receiving changed-path batch files.
    pub output_dir: PathBuf,

    /// Seconds between writing change files.
    #[arg(short = 'i', long, default_value_t = 30)]
    pub dump_interval: u64,

    /// Seconds between full rescans of the tree.
    #[arg(short = 'f', long, default_value_t = 7200)]
    pub full_scan_interval: u64,

    /// Glob pattern to exclude (repeatable; default: *.tmp and *~).
    #[arg(short = 'e', long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    /// Maximum depth to descend into subdirectories.
    #[arg(short = 'r', long, default_value_t = 20)]
    pub recursion_depth: u32,

    /// Seconds between change-queue processing runs.
    #[arg(short = 'q', long, default_value_t = 2)]
    pub queue_run_interval: u64,

    /// Maximum seconds to spend on one queue processing run.
    #[arg(short = 'm', long, default_value_t = 5)]
    pub queue_run_max: u64,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let exit = crate::register_exit_flag()?;
        let options = WatchOptions {
            full_scan_interval: Duration::from_secs(self.full_scan_interval),
            queue_run_interval: Duration::from_secs(self.queue_run_interval),
            queue_run_max: Duration::from_secs(self.queue_run_max),
            dump_interval: Duration::from_secs(self.dump_interval),
            max_depth: self.recursion_depth,
            excludes: self.excludes,
        };
        watch_dir(&self.directory, &self.output_dir, &options, &exit)
            .with_context(|| format!("watching {}", self.directory.display()))
    }
}
