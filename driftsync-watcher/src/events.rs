//! Kernel event dispatch: one batch in, tree mutations and queue work out.

use std::fs;
use std::time::Instant;

use inotify::EventMask;

use crate::runtime::TopDir;
use crate::tree::DirId;
use crate::watches::DirEvent;

/// What an event means for the named child, given whether the model
/// already knows it. Renames arrive as separate moved-from / moved-to
/// events, which this classification folds into delete-at-source plus
/// create-at-destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventAction {
    Create,
    Update,
    Delete,
    None,
}

fn classify(mask: EventMask, known: bool) -> EventAction {
    if mask.intersects(
        EventMask::ATTRIB | EventMask::CREATE | EventMask::MODIFY | EventMask::MOVED_TO,
    ) {
        if known {
            EventAction::Update
        } else {
            EventAction::Create
        }
    } else if mask.intersects(EventMask::DELETE | EventMask::MOVED_FROM) && known {
        EventAction::Delete
    } else {
        EventAction::None
    }
}

impl TopDir {
    /// Read one event batch and apply each event to the model.
    pub(crate) fn process_events(&mut self) {
        for event in self.notifier.read_batch() {
            self.handle_event(event);
        }
    }

    pub(crate) fn handle_event(&mut self, event: DirEvent) {
        // Without a known source directory there is nothing to do.
        let Some(dir_id) = self.index.lookup(&event.wd) else {
            return;
        };
        if self.tree.dir(dir_id).is_none() {
            return;
        }

        // The watched directory itself is gone.
        if event.mask.contains(EventMask::DELETE_SELF) {
            self.remove_dir(dir_id);
            return;
        }

        let Some(name) = event.name.clone() else {
            return;
        };
        if name.is_empty() {
            return;
        }

        if event.mask.contains(EventMask::ISDIR) {
            self.handle_dir_event(dir_id, &name, event.mask);
        } else {
            self.handle_file_event(dir_id, &name, event.mask);
        }
    }

    fn handle_file_event(&mut self, dir_id: DirId, name: &str, mask: EventMask) {
        let existing = self.tree.lookup_file(dir_id, name);
        match classify(mask, existing.is_some()) {
            EventAction::Create => {
                if !self.filter.accepts(name) {
                    return;
                }
                let Some(dir) = self.tree.dir(dir_id) else {
                    return;
                };
                let full = dir.abs_path.join(name);
                // Only regular files that still exist are tracked.
                let Ok(meta) = fs::symlink_metadata(&full) else {
                    return;
                };
                if !meta.is_file() {
                    return;
                }
                tracing::debug!(path = %full.display(), "adding new file");
                if let Some(file_id) = self.tree.add_file(dir_id, name) {
                    self.queue.queue_file(file_id, Instant::now());
                }
            }
            EventAction::Update => {
                if let Some(file_id) = existing {
                    self.queue.queue_file(file_id, Instant::now());
                }
            }
            EventAction::Delete => {
                let Some(file_id) = existing else {
                    return;
                };
                if let Some(dir) = self.tree.dir(dir_id) {
                    let parent_rel = dir.rel_path.clone();
                    self.changed.mark(&parent_rel, true);
                }
                tracing::debug!(name, "triggering file removal");
                self.remove_file(file_id);
            }
            EventAction::None => {}
        }
    }

    fn handle_dir_event(&mut self, dir_id: DirId, name: &str, mask: EventMask) {
        let existing = self.tree.lookup_subdir(dir_id, name);
        match classify(mask, existing.is_some()) {
            EventAction::Create => {
                if !self.filter.accepts(name) {
                    return;
                }
                let Some(dir) = self.tree.dir(dir_id) else {
                    return;
                };
                let full = dir.abs_path.join(name);
                let Ok(meta) = fs::symlink_metadata(&full) else {
                    return;
                };
                if !meta.is_dir() {
                    return;
                }
                tracing::debug!(path = %full.display(), "adding new subdirectory");
                let Some(new_id) = self.tree.add_dir(dir_id, name) else {
                    // Refused by the depth limit.
                    return;
                };
                self.queue.queue_dir(new_id, Instant::now());
                if let Some(new_dir) = self.tree.dir(new_id) {
                    let rel = new_dir.rel_path.clone();
                    self.changed.mark(&rel, true);
                }
            }
            EventAction::Update => {
                if let Some(sub_id) = existing {
                    self.queue.queue_dir(sub_id, Instant::now());
                }
            }
            EventAction::Delete => {
                let Some(sub_id) = existing else {
                    return;
                };
                tracing::debug!(name, "triggering directory removal");
                self.remove_dir(sub_id);
                if let Some(dir) = self.tree.dir(dir_id) {
                    let parent_rel = dir.rel_path.clone();
                    self.changed.mark(&parent_rel, true);
                }
            }
            EventAction::None => {}
        }
    }
}
