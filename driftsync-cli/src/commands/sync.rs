//! `driftsync sync`: supervise one sync set.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use driftsync_core::config::{
    DEFAULT_FULL_INTERVAL, DEFAULT_FULL_RETRY, DEFAULT_PARTIAL_INTERVAL, DEFAULT_PARTIAL_RETRY,
    DEFAULT_RECURSION_DEPTH,
};
use driftsync_core::SyncSet;
use driftsync_supervisor::supervise_set;

/// Continuously synchronise SOURCE to DESTINATION: full transfers on a
/// slow schedule, watcher-driven partial transfers on a fast one.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Label for log lines and the status file; defaults to the source
    /// directory's name.
    #[arg(long)]
    pub name: Option<String>,

    /// Directory tree to mirror.
    #[arg(long)]
    pub source: PathBuf,

    /// rsync destination (path or remote spec).
    #[arg(long)]
    pub destination: String,

    /// Glob pattern to exclude (repeatable; default: *.tmp and *~).
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    /// Shell command that must succeed before the source is touched.
    #[arg(long)]
    pub source_validation: Option<String>,

    /// Shell command that must succeed before the destination is written.
    #[arg(long)]
    pub destination_validation: Option<String>,

    /// Seconds between full syncs; 0 disables them.
    #[arg(long, default_value_t = DEFAULT_FULL_INTERVAL)]
    pub full_interval: u64,

    /// Seconds before retrying a failed full sync.
    #[arg(long, default_value_t = DEFAULT_FULL_RETRY)]
    pub full_retry: u64,

    /// Seconds between partial syncs; 0 disables them and the watcher.
    #[arg(long, default_value_t = DEFAULT_PARTIAL_INTERVAL)]
    pub partial_interval: u64,

    /// Seconds before retrying a failed partial sync.
    #[arg(long, default_value_t = DEFAULT_PARTIAL_RETRY)]
    pub partial_retry: u64,

    /// Maximum depth to descend into subdirectories.
    #[arg(long, default_value_t = DEFAULT_RECURSION_DEPTH)]
    pub recursion_depth: u32,

    /// Marker file recording the last successful full sync.
    #[arg(long)]
    pub full_marker: Option<PathBuf>,

    /// Marker file recording the last successful partial sync.
    #[arg(long)]
    pub partial_marker: Option<PathBuf>,

    /// Directory where the watcher leaves changed-path batches.
    #[arg(long)]
    pub change_queue: Option<PathBuf>,

    /// Path of the collated transfer list.
    #[arg(long)]
    pub transfer_list: Option<PathBuf>,

    /// Parent directory for scratch space (default: /tmp).
    #[arg(long)]
    pub tempdir: Option<PathBuf>,

    /// Lock file serializing transfers of overlapping sets.
    #[arg(long)]
    pub sync_lock: Option<PathBuf>,

    /// Override rsync options for full syncs.
    #[arg(long)]
    pub full_rsync_opts: Option<String>,

    /// Override rsync options for partial syncs.
    #[arg(long)]
    pub partial_rsync_opts: Option<String>,

    /// Per-set operational log file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Status file, atomically republished on every state change.
    #[arg(long)]
    pub status_file: Option<PathBuf>,
}

impl SyncArgs {
    fn into_set(self) -> SyncSet {
        let name = self.name.clone().unwrap_or_else(|| {
            self.source
                .file_name()
                .map(|leaf| leaf.to_string_lossy().into_owned())
                .unwrap_or_else(|| "sync".to_owned())
        });
        let mut set = SyncSet::new(name, self.source, self.destination);
        set.excludes = self.excludes;
        set.source_validation = self.source_validation;
        set.destination_validation = self.destination_validation;
        set.full_interval = self.full_interval;
        set.full_retry = self.full_retry;
        set.partial_interval = self.partial_interval;
        set.partial_retry = self.partial_retry;
        set.recursion_depth = self.recursion_depth;
        set.full_marker = self.full_marker;
        set.partial_marker = self.partial_marker;
        set.change_queue = self.change_queue;
        set.transfer_list = self.transfer_list;
        set.tempdir = self.tempdir;
        set.sync_lock = self.sync_lock;
        set.full_rsync_opts = self.full_rsync_opts;
        set.partial_rsync_opts = self.partial_rsync_opts;
        set.log_file = self.log_file;
        set.status_file = self.status_file;
        set
    }

    pub fn run(self) -> Result<()> {
        let exit = crate::register_exit_flag()?;
        let set = self.into_set();
        let name = set.name.clone();
        supervise_set(&set, &exit).with_context(|| format!("sync set '{name}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SyncArgs,
    }

    fn parse(args: &[&str]) -> SyncArgs {
        let mut full = vec!["harness"];
        full.extend_from_slice(args);
        Harness::parse_from(full).args
    }

    #[test]
    fn minimal_invocation_uses_defaults() {
        let set = parse(&["--source", "/srv/data", "--destination", "backup:/srv"]).into_set();
        assert_eq!(set.name, "data", "name defaults to the source leaf");
        assert_eq!(set.full_interval, DEFAULT_FULL_INTERVAL);
        assert_eq!(set.partial_interval, DEFAULT_PARTIAL_INTERVAL);
        assert_eq!(set.recursion_depth, DEFAULT_RECURSION_DEPTH);
        assert!(set.sync_lock.is_none());
    }

    #[test]
    fn explicit_flags_reach_the_set() {
        let set = parse(&[
            "--name",
            "mirror",
            "--source",
            "/srv/data",
            "--destination",
            "/mnt/mirror",
            "--exclude",
            "*.log",
            "--exclude",
            "cache-*",
            "--full-interval",
            "0",
            "--partial-interval",
            "5",
            "--sync-lock",
            "/run/mirror.lock",
        ])
        .into_set();

        assert_eq!(set.name, "mirror");
        assert_eq!(set.excludes, ["*.log", "cache-*"]);
        assert_eq!(set.full_interval, 0);
        assert_eq!(set.partial_interval, 5);
        assert_eq!(set.sync_lock, Some(PathBuf::from("/run/mirror.lock")));
    }
}
