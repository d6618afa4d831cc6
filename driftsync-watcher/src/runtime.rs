//! The watcher runtime: one top directory, one single-threaded loop.
//!
//! The loop interleaves four duties, none of which may starve the others:
//! reading kernel events, queueing periodic full rescans, draining the
//! change queue under a time cap, and publishing changed-path batches.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use driftsync_core::PathFilter;

use crate::changed::ChangedPaths;
use crate::error::{io_err, WatcherError};
use crate::queue::{ChangeQueue, QueueTarget};
use crate::tree::{DirId, FileCheck, FileId, Tree};
use crate::watches::{Notifier, Readiness, WatchIndex};

/// Tunables of one watcher instance.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Interval between full rescans of the tree.
    pub full_scan_interval: Duration,
    /// Interval between change-queue drains.
    pub queue_run_interval: Duration,
    /// Time cap on a single drain, so an overloaded tick cannot starve
    /// event reads.
    pub queue_run_max: Duration,
    /// Interval between changed-path batch publishes.
    pub dump_interval: Duration,
    /// Maximum directory depth to descend.
    pub max_depth: u32,
    /// Leaf-name exclusion globs; empty selects the built-in rule.
    pub excludes: Vec<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            full_scan_interval: Duration::from_secs(7200),
            queue_run_interval: Duration::from_secs(2),
            queue_run_max: Duration::from_secs(5),
            dump_interval: Duration::from_secs(30),
            max_depth: 20,
            excludes: Vec::new(),
        }
    }
}

/// One watched root with all its bookkeeping.
pub struct TopDir {
    pub(crate) out_dir: PathBuf,
    pub(crate) filter: PathFilter,
    pub(crate) notifier: Notifier,
    pub(crate) tree: Tree,
    pub(crate) index: WatchIndex,
    pub(crate) queue: ChangeQueue,
    pub(crate) changed: ChangedPaths,
}

impl TopDir {
    /// Resolve the root and set up the notification handle. Failure to
    /// resolve the root is fatal; failure to initialise inotify is not:
    /// the watcher then degrades to periodic rescans only.
    pub fn new(root: &Path, out_dir: &Path, options: &WatchOptions) -> Result<Self, WatcherError> {
        Self::with_notifier(root, out_dir, options, Notifier::init())
    }

    pub(crate) fn with_notifier(
        root: &Path,
        out_dir: &Path,
        options: &WatchOptions,
        notifier: Notifier,
    ) -> Result<Self, WatcherError> {
        let root = root
            .canonicalize()
            .map_err(|source| WatcherError::BadRoot {
                path: root.to_path_buf(),
                source,
            })?;
        let filter = PathFilter::new(&options.excludes)?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            filter,
            notifier,
            tree: Tree::new(root, options.max_depth),
            index: WatchIndex::default(),
            queue: ChangeQueue::default(),
            changed: ChangedPaths::default(),
        })
    }

    /// Remove a file from the model and drop its pending queue work.
    pub(crate) fn remove_file(&mut self, id: FileId) {
        self.queue.remove_file(id);
        self.tree.remove_file(id);
    }

    /// Remove a directory subtree: kernel watches, index entries and queue
    /// work for every node underneath go with it.
    pub(crate) fn remove_dir(&mut self, id: DirId) {
        let removed = self.tree.remove_dir(id);
        for (dir_id, watch) in removed.dirs {
            if let Some(wd) = watch {
                self.notifier.remove_watch(wd.clone());
                self.index.remove(&wd);
            }
            self.queue.remove_dir(dir_id);
        }
        for file_id in removed.files {
            self.queue.remove_file(file_id);
        }
    }

    /// Re-examine one file and record the outcome.
    ///
    /// A vanished file is treated as an implicit deletion: the parent
    /// directory is marked changed so the transfer picks up the removal.
    pub(crate) fn process_file_check(&mut self, id: FileId) {
        let Some(node) = self.tree.file(id) else {
            return;
        };
        let file_rel = node.rel_path.clone();
        let parent_rel = self.tree.dir(node.parent).map(|dir| dir.rel_path.clone());

        match self.tree.check_file_changed(id) {
            FileCheck::Gone => {
                if let Some(parent_rel) = parent_rel {
                    self.changed.mark(&parent_rel, true);
                }
                self.remove_file(id);
            }
            FileCheck::Changed => self.changed.mark(&file_rel, false),
            FileCheck::Unchanged => {}
        }
    }

    /// Drain the change queue until `deadline`.
    ///
    /// Entries are visited in insertion order; tombstones and entries whose
    /// referent has left the tree are dropped, entries not yet due (or cut
    /// off by the deadline) are retained in order ahead of any work queued
    /// by the drain itself.
    pub(crate) fn run_change_queue(&mut self, deadline: Instant) {
        if self.queue.is_empty() {
            return;
        }
        tracing::debug!(queue_len = self.queue.len(), "change queue: starting run");

        let entries = self.queue.take_entries();
        let mut deferred = Vec::new();
        for entry in entries {
            if self.queue.is_tombstone(&entry) {
                continue;
            }
            let alive = match entry.target {
                QueueTarget::File(id) => self.tree.file(id).is_some(),
                QueueTarget::Dir(id) => self.tree.dir(id).is_some(),
            };
            if !alive {
                self.queue.unmark(entry.target);
                continue;
            }

            let now = Instant::now();
            if entry.when > now || now >= deadline {
                deferred.push(entry);
                continue;
            }

            self.queue.unmark(entry.target);
            match entry.target {
                QueueTarget::File(id) => self.process_file_check(id),
                QueueTarget::Dir(id) => {
                    self.scan_dir(id, false);
                }
            }
        }
        self.queue.restore(deferred);

        tracing::debug!(queue_len = self.queue.len(), "change queue: run ended");
    }

    /// Drive the watcher until the exit flag is raised.
    pub fn run(&mut self, options: &WatchOptions, exit: &Arc<AtomicBool>) {
        let mut next_full_scan = Instant::now();
        let mut next_queue_run = Instant::now();
        let mut next_dump = Instant::now();

        while !exit.load(Ordering::SeqCst) {
            match self.notifier.wait_readable(Duration::from_millis(100)) {
                Readiness::Ready => self.process_events(),
                Readiness::TimedOut => {}
                Readiness::Disabled => std::thread::sleep(Duration::from_secs(1)),
                Readiness::Interrupted => break,
            }

            let now = Instant::now();

            if now >= next_full_scan {
                next_full_scan = now + options.full_scan_interval;
                self.queue.queue_dir(self.tree.root(), now);
            }

            if now >= next_queue_run {
                next_queue_run = now + options.queue_run_interval;
                self.run_change_queue(now + options.queue_run_max);
            }

            if now >= next_dump {
                next_dump = now + options.dump_interval;
                match self.changed.dump(&self.out_dir) {
                    Ok(Some(path)) => {
                        tracing::debug!(path = %path.display(), "published changed paths");
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(error = %err, "failed to publish changed paths");
                    }
                }
            }
        }
    }
}

/// Watch `root`, publishing changed-path batches into `out_dir` until the
/// exit flag is raised.
pub fn watch_dir(
    root: &Path,
    out_dir: &Path,
    options: &WatchOptions,
    exit: &Arc<AtomicBool>,
) -> Result<(), WatcherError> {
    // The output directory must exist before batches can be renamed into it.
    std::fs::metadata(out_dir).map_err(|e| io_err(out_dir, e))?;

    let mut top = TopDir::new(root, out_dir, options)?;
    tracing::info!(
        root = %root.display(),
        out_dir = %out_dir.display(),
        notifications = top.notifier.enabled(),
        "watcher starting"
    );
    top.run(options, exit);
    tracing::info!(root = %root.display(), "watcher exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    fn polling_topdir(root: &TempDir, out: &TempDir, options: &WatchOptions) -> TopDir {
        TopDir::with_notifier(root.path(), out.path(), options, Notifier::disabled())
            .expect("topdir")
    }

    #[test]
    fn queue_drain_checks_files_and_emits_changes() {
        let root = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(root.path().join("a.txt"), "hello").unwrap();

        let options = WatchOptions::default();
        let mut top = polling_topdir(&root, &out, &options);
        top.scan_dir(top.tree.root(), false);

        let file = top.tree.lookup_file(top.tree.root(), "a.txt").unwrap();
        fs::write(root.path().join("a.txt"), "hello again").unwrap();

        let past = Instant::now() - Duration::from_secs(1);
        top.queue.queue_file_at(file, past);
        top.run_change_queue(Instant::now() + Duration::from_secs(5));

        assert_eq!(top.changed.entries(), ["a.txt"]);
        assert!(top.queue.is_empty());
    }

    #[test]
    fn repeated_queueing_yields_a_single_emission() {
        let root = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(root.path().join("a.txt"), "v1").unwrap();

        let options = WatchOptions::default();
        let mut top = polling_topdir(&root, &out, &options);
        top.scan_dir(top.tree.root(), false);
        let file = top.tree.lookup_file(top.tree.root(), "a.txt").unwrap();

        fs::write(root.path().join("a.txt"), "v2-longer").unwrap();
        let past = Instant::now() - Duration::from_secs(1);
        for _ in 0..5 {
            top.queue.queue_file_at(file, past);
        }
        assert_eq!(top.queue.len(), 1, "dedup keeps one pending check");

        top.run_change_queue(Instant::now() + Duration::from_secs(5));
        assert_eq!(top.changed.entries(), ["a.txt"]);
    }

    #[test]
    fn vanished_file_marks_parent_directory() {
        let root = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        fs::write(root.path().join("sub/b"), "data").unwrap();

        let options = WatchOptions::default();
        let mut top = polling_topdir(&root, &out, &options);
        top.scan_dir(top.tree.root(), false);

        let sub = top.tree.lookup_subdir(top.tree.root(), "sub").unwrap();
        let file = top.tree.lookup_file(sub, "b").unwrap();
        fs::remove_file(root.path().join("sub/b")).unwrap();

        let past = Instant::now() - Duration::from_secs(1);
        top.queue.queue_file_at(file, past);
        top.run_change_queue(Instant::now() + Duration::from_secs(5));

        assert_eq!(top.changed.entries(), ["sub/"]);
        assert!(top.tree.file(file).is_none());
    }

    #[test]
    fn entries_not_yet_due_are_retained() {
        let root = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(root.path().join("a.txt"), "v1").unwrap();

        let options = WatchOptions::default();
        let mut top = polling_topdir(&root, &out, &options);
        top.scan_dir(top.tree.root(), false);
        let file = top.tree.lookup_file(top.tree.root(), "a.txt").unwrap();

        top.queue.queue_file(file, Instant::now());
        top.run_change_queue(Instant::now() + Duration::from_secs(5));

        assert_eq!(top.queue.len(), 1, "not-yet-due entry must be retained");
        assert!(top.changed.is_empty());
    }

    #[test]
    fn drain_drops_entries_for_removed_nodes() {
        let root = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();

        let options = WatchOptions::default();
        let mut top = polling_topdir(&root, &out, &options);
        top.scan_dir(top.tree.root(), false);
        let sub = top.tree.lookup_subdir(top.tree.root(), "sub").unwrap();

        let past = Instant::now() - Duration::from_secs(1);
        top.queue.queue_dir(sub, past);
        top.remove_dir(sub);
        top.run_change_queue(Instant::now() + Duration::from_secs(5));

        assert!(top.queue.is_empty());
        assert!(top.changed.is_empty());
    }
}
