//! Deferred-work queue of file checks and directory scans.
//!
//! Entries carry an earliest-process time; file checks are pushed two
//! seconds into the future so bursts of writes to one file coalesce into a
//! single stat. A secondary id set keeps at most one pending entry per
//! referent. Removal only clears the id from the set; the queued entry
//! turns into a tombstone that the next drain pass drops when its referent
//! is no longer in the tree.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::tree::{DirId, FileId};

/// Settling delay before a queued file check becomes due.
pub const FILE_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// What a queue entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTarget {
    File(FileId),
    Dir(DirId),
}

#[derive(Debug, Clone, Copy)]
pub struct QueueEntry {
    pub when: Instant,
    pub target: QueueTarget,
}

#[derive(Debug, Default)]
pub struct ChangeQueue {
    entries: Vec<QueueEntry>,
    queued_files: HashSet<FileId>,
    queued_dirs: HashSet<DirId>,
}

impl ChangeQueue {
    /// Queue a file check, due after the settling delay. No-op when the
    /// file already has a pending check.
    pub fn queue_file(&mut self, id: FileId, now: Instant) {
        self.queue_file_at(id, now + FILE_SETTLE_DELAY);
    }

    /// Queue a file check with an explicit due time.
    pub fn queue_file_at(&mut self, id: FileId, when: Instant) {
        if !self.queued_files.insert(id) {
            return;
        }
        tracing::debug!(file = ?id, "adding to change queue: check file");
        self.entries.push(QueueEntry {
            when,
            target: QueueTarget::File(id),
        });
    }

    /// Queue a directory scan, due immediately. No-op when the directory
    /// already has a pending scan.
    pub fn queue_dir(&mut self, id: DirId, now: Instant) {
        if !self.queued_dirs.insert(id) {
            return;
        }
        tracing::debug!(dir = ?id, "adding to change queue: scan directory");
        self.entries.push(QueueEntry {
            when: now,
            target: QueueTarget::Dir(id),
        });
    }

    /// Turn any pending check for `id` into a tombstone.
    pub fn remove_file(&mut self, id: FileId) {
        self.queued_files.remove(&id);
    }

    /// Turn any pending scan for `id` into a tombstone.
    pub fn remove_dir(&mut self, id: DirId) {
        self.queued_dirs.remove(&id);
    }

    pub fn contains_file(&self, id: FileId) -> bool {
        self.queued_files.contains(&id)
    }

    pub fn contains_dir(&self, id: DirId) -> bool {
        self.queued_dirs.contains(&id)
    }

    /// `true` when `entry` has been tombstoned since it was queued.
    pub fn is_tombstone(&self, entry: &QueueEntry) -> bool {
        match entry.target {
            QueueTarget::File(id) => !self.queued_files.contains(&id),
            QueueTarget::Dir(id) => !self.queued_dirs.contains(&id),
        }
    }

    /// Mark `target` as no longer pending, so follow-up work can requeue it.
    pub fn unmark(&mut self, target: QueueTarget) {
        match target {
            QueueTarget::File(id) => {
                self.queued_files.remove(&id);
            }
            QueueTarget::Dir(id) => {
                self.queued_dirs.remove(&id);
            }
        }
    }

    /// Take the whole entry list for a drain pass. Entries the drain keeps
    /// must come back through [`ChangeQueue::restore`].
    pub fn take_entries(&mut self) -> Vec<QueueEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Re-insert deferred entries ahead of anything queued during the
    /// drain, preserving insertion order overall.
    pub fn restore(&mut self, mut deferred: Vec<QueueEntry>) {
        let appended = std::mem::take(&mut self.entries);
        deferred.extend(appended);
        self.entries = deferred;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::tree::Tree;

    fn ids() -> (Tree, FileId, DirId) {
        let mut tree = Tree::new(PathBuf::from("/watched"), 20);
        let root = tree.root();
        let file = tree.add_file(root, "a").unwrap();
        let dir = tree.add_dir(root, "sub").unwrap();
        (tree, file, dir)
    }

    #[test]
    fn duplicate_targets_are_queued_once() {
        let (_tree, file, dir) = ids();
        let mut queue = ChangeQueue::default();
        let now = Instant::now();

        queue.queue_file(file, now);
        queue.queue_file(file, now);
        queue.queue_dir(dir, now);
        queue.queue_dir(dir, now);

        assert_eq!(queue.len(), 2);
        assert!(queue.contains_file(file));
        assert!(queue.contains_dir(dir));
    }

    #[test]
    fn file_checks_are_deferred_by_the_settle_delay() {
        let (_tree, file, _dir) = ids();
        let mut queue = ChangeQueue::default();
        let now = Instant::now();
        queue.queue_file(file, now);

        let entries = queue.take_entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].when >= now + FILE_SETTLE_DELAY);
    }

    #[test]
    fn removal_tombstones_the_pending_entry() {
        let (_tree, file, dir) = ids();
        let mut queue = ChangeQueue::default();
        let now = Instant::now();
        queue.queue_file(file, now);
        queue.queue_dir(dir, now);

        queue.remove_file(file);
        assert!(!queue.contains_file(file));
        let entries = queue.take_entries();
        assert!(queue.is_tombstone(&entries[0]));
        assert!(!queue.is_tombstone(&entries[1]));
    }

    #[test]
    fn restore_keeps_deferred_entries_before_new_work() {
        let (mut tree, file, _dir) = ids();
        let other = tree.add_file(tree.root(), "b").unwrap();
        let mut queue = ChangeQueue::default();
        let now = Instant::now();

        queue.queue_file(file, now);
        let deferred = queue.take_entries();
        queue.queue_file(other, now);
        queue.restore(deferred);

        let order: Vec<QueueTarget> = queue.take_entries().iter().map(|e| e.target).collect();
        assert_eq!(order, vec![QueueTarget::File(file), QueueTarget::File(other)]);
    }

    #[test]
    fn unmark_allows_requeueing() {
        let (_tree, file, _dir) = ids();
        let mut queue = ChangeQueue::default();
        let now = Instant::now();

        queue.queue_file(file, now);
        queue.unmark(QueueTarget::File(file));
        queue.queue_file(file, now);
        // One stale entry plus one live one; the stale one is a tombstone.
        assert_eq!(queue.len(), 2);
    }
}
