//! The per-set synchronization contract.
//!
//! Configuration-file parsing lives outside this workspace; whatever reads a
//! config hands the supervisor one fully-resolved [`SyncSet`] per section.

use std::path::PathBuf;

/// Seconds between full syncs when unconfigured (one day).
pub const DEFAULT_FULL_INTERVAL: u64 = 86_400;
/// Retry delay after a failed full sync (one hour).
pub const DEFAULT_FULL_RETRY: u64 = 3_600;
/// Seconds between partial syncs when unconfigured.
pub const DEFAULT_PARTIAL_INTERVAL: u64 = 30;
/// Retry delay after a failed partial sync.
pub const DEFAULT_PARTIAL_RETRY: u64 = 300;
/// Maximum directory depth the watcher descends.
pub const DEFAULT_RECURSION_DEPTH: u32 = 20;

/// One (source, destination, options) tuple; each set gets one supervisor.
#[derive(Debug, Clone)]
pub struct SyncSet {
    /// Section label used in log lines and the status file.
    pub name: String,
    /// Directory tree to mirror.
    pub source: PathBuf,
    /// rsync destination (local path or remote spec).
    pub destination: String,
    /// Leaf-name exclusion globs; empty selects the built-in rule.
    pub excludes: Vec<String>,
    /// Shell command gating any sync of the source, if set.
    pub source_validation: Option<String>,
    /// Shell command gating any sync of the destination, if set.
    pub destination_validation: Option<String>,
    /// Seconds between full syncs; 0 disables them.
    pub full_interval: u64,
    /// Seconds before retrying a failed full sync.
    pub full_retry: u64,
    /// Seconds between partial syncs; 0 disables them (and the watcher).
    pub partial_interval: u64,
    /// Seconds before retrying a failed partial sync.
    pub partial_retry: u64,
    /// Maximum directory depth to watch.
    pub recursion_depth: u32,
    /// Zero-length file whose mtime records the last successful full sync.
    pub full_marker: Option<PathBuf>,
    /// Zero-length file whose mtime records the last successful partial sync.
    pub partial_marker: Option<PathBuf>,
    /// Directory where the watcher publishes changed-path batches.
    /// Defaults to `<workdir>/changes` when unset.
    pub change_queue: Option<PathBuf>,
    /// Collated `--files-from` list. Defaults to `<workdir>/transfer`.
    pub transfer_list: Option<PathBuf>,
    /// Parent for the temporary working directory. Defaults to `/tmp`.
    pub tempdir: Option<PathBuf>,
    /// Advisory-lock file serializing competing transfers.
    pub sync_lock: Option<PathBuf>,
    /// Override for the full-sync rsync options.
    pub full_rsync_opts: Option<String>,
    /// Override for the partial-sync rsync options.
    pub partial_rsync_opts: Option<String>,
    /// Per-set operational log file.
    pub log_file: Option<PathBuf>,
    /// Human-readable status file, atomically republished on state changes.
    pub status_file: Option<PathBuf>,
}

impl SyncSet {
    /// A set with default intervals and no optional collaborators.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
            excludes: Vec::new(),
            source_validation: None,
            destination_validation: None,
            full_interval: DEFAULT_FULL_INTERVAL,
            full_retry: DEFAULT_FULL_RETRY,
            partial_interval: DEFAULT_PARTIAL_INTERVAL,
            partial_retry: DEFAULT_PARTIAL_RETRY,
            recursion_depth: DEFAULT_RECURSION_DEPTH,
            full_marker: None,
            partial_marker: None,
            change_queue: None,
            transfer_list: None,
            tempdir: None,
            sync_lock: None,
            full_rsync_opts: None,
            partial_rsync_opts: None,
            log_file: None,
            status_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_set_carries_documented_defaults() {
        let set = SyncSet::new("mirror", "/srv/data", "backup:/srv/data");
        assert_eq!(set.full_interval, 86_400);
        assert_eq!(set.full_retry, 3_600);
        assert_eq!(set.partial_interval, 30);
        assert_eq!(set.partial_retry, 300);
        assert_eq!(set.recursion_depth, 20);
        assert!(set.excludes.is_empty());
        assert!(set.sync_lock.is_none());
    }
}
