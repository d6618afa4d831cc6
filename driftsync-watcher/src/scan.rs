//! One-level directory rescans, reconciled against the tree model.

use std::fs;
use std::os::unix::fs::MetadataExt;

use crate::runtime::TopDir;
use crate::tree::{DirId, FileCheck, WatchState};

impl TopDir {
    /// Scan `id`'s immediate children and reconcile them with the model,
    /// recursing into surviving subdirectories unless `no_recurse` is set.
    ///
    /// Returns `false` when the directory could not be scanned, in which
    /// case it has been removed from the model along with its subtree.
    ///
    /// The ordering below guarantees that an entry swapped for a
    /// differently-typed one is removed (watches included) before it can be
    /// re-added, so no stale watch survives a type change.
    pub(crate) fn scan_dir(&mut self, id: DirId, no_recurse: bool) -> bool {
        let Some(node) = self.tree.dir(id) else {
            return false;
        };
        let abs = node.abs_path.clone();
        let rel = node.rel_path.clone();

        if node.depth > self.tree.max_depth() {
            tracing::debug!(path = %rel, "too deep, removing");
            self.remove_dir(id);
            return false;
        }

        let dir_meta = match fs::symlink_metadata(&abs) {
            Ok(meta) => meta,
            Err(err) => {
                tracing::error!(path = %rel, error = %err, "lstat failed, removing");
                self.remove_dir(id);
                return false;
            }
        };
        let dir_dev = dir_meta.dev();

        let mut names = match fs::read_dir(&abs) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
            Err(err) => {
                tracing::error!(path = %abs.display(), error = %err, "scandir failed, removing");
                self.remove_dir(id);
                return false;
            }
        };
        names.sort();

        // Clear the marks so entries gone from disk stand out afterwards.
        for file_id in self.tree.file_ids(id) {
            if let Some(file) = self.tree.file_mut(file_id) {
                file.seen_in_rescan = false;
            }
        }
        for dir_id in self.tree.subdir_ids(id) {
            if let Some(dir) = self.tree.dir_mut(dir_id) {
                dir.seen_in_rescan = false;
            }
        }

        for name in names {
            if !self.filter.accepts(&name) {
                continue;
            }
            let full = abs.join(&name);
            let Ok(meta) = fs::symlink_metadata(&full) else {
                continue;
            };

            if meta.is_file() {
                if let Some(file_id) = self.tree.add_file(id, &name) {
                    if let Some(file) = self.tree.file_mut(file_id) {
                        file.seen_in_rescan = true;
                    }
                }
            } else if meta.is_dir() {
                // Never cross a filesystem boundary.
                if meta.dev() == dir_dev {
                    if let Some(dir_id) = self.tree.add_dir(id, &name) {
                        if let Some(dir) = self.tree.dir_mut(dir_id) {
                            dir.seen_in_rescan = true;
                        }
                    }
                } else {
                    tracing::debug!(path = %full.display(), "skipping, different filesystem");
                }
            }
        }

        // Subdirectories that vanished are removed; survivors are rescanned.
        for dir_id in self.tree.subdir_ids(id) {
            let seen = self
                .tree
                .dir(dir_id)
                .map(|dir| dir.seen_in_rescan)
                .unwrap_or(false);
            if !seen {
                self.remove_dir(dir_id);
            } else if !no_recurse {
                self.scan_dir(dir_id, false);
            }
        }

        // Files that vanished are removed without marking; the periodic
        // full sync reconciles deletions found this way.
        for file_id in self.tree.file_ids(id) {
            let seen = self
                .tree
                .file(file_id)
                .map(|file| file.seen_in_rescan)
                .unwrap_or(false);
            if !seen {
                self.remove_file(file_id);
            }
        }

        // Refresh the (mtime, size) record of everything that remains.
        for file_id in self.tree.file_ids(id) {
            if self.tree.check_file_changed(file_id) == FileCheck::Gone {
                self.remove_file(file_id);
            }
        }

        self.install_watch_if_needed(id, &abs);
        true
    }

    fn install_watch_if_needed(&mut self, id: DirId, abs: &std::path::Path) {
        if !self.notifier.enabled() {
            return;
        }
        let watched = matches!(
            self.tree.dir(id).map(|dir| &dir.watch),
            Some(WatchState::Watched(_))
        );
        if watched {
            return;
        }

        match self.notifier.add_watch(abs) {
            Some(wd) => {
                self.index.insert(wd.clone(), id);
                if let Some(dir) = self.tree.dir_mut(id) {
                    tracing::debug!(path = %dir.rel_path, "adding watch");
                    dir.watch = WatchState::Watched(wd);
                }
            }
            None => {
                if let Some(dir) = self.tree.dir_mut(id) {
                    dir.watch = WatchState::Failed;
                }
            }
        }
    }
}
