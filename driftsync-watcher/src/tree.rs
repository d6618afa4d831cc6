//! In-memory model of the watched tree.
//!
//! Nodes live in an arena keyed by stable ids; parent links are ids, never
//! owning references, so removal is a map operation plus a detach from the
//! parent's child table. Child tables are keyed by leaf name, which makes
//! sibling-name uniqueness structural and iteration deterministic.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use inotify::WatchDescriptor;

/// Stable handle for a directory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(u64);

/// Stable handle for a file node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u64);

/// Watch installation state of a directory.
///
/// Every directory at an eligible depth is either watched or has a recorded
/// failed install attempt; `Unwatched` only occurs before the first scan
/// touches the node (or when notifications are disabled entirely).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Unwatched,
    Watched(WatchDescriptor),
    Failed,
}

/// Last observed (mtime, size) pair used for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime: SystemTime,
    pub size: u64,
}

#[derive(Debug)]
pub struct FileNode {
    pub abs_path: PathBuf,
    /// Path relative to the watched root.
    pub rel_path: String,
    pub leaf: String,
    pub parent: DirId,
    /// `None` until the first successful stat, so a freshly added file
    /// always reads as changed once its metadata is observed.
    pub stamp: Option<FileStamp>,
    pub seen_in_rescan: bool,
}

#[derive(Debug)]
pub struct DirNode {
    pub abs_path: PathBuf,
    /// Path relative to the watched root; empty for the root itself.
    pub rel_path: String,
    pub leaf: String,
    /// `None` at the root.
    pub parent: Option<DirId>,
    /// Subdirectory levels below the root; 0 at the root.
    pub depth: u32,
    pub watch: WatchState,
    pub files: BTreeMap<String, FileId>,
    pub subdirs: BTreeMap<String, DirId>,
    pub seen_in_rescan: bool,
}

/// Outcome of re-examining one file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCheck {
    Unchanged,
    Changed,
    /// Stat failed or the path is no longer a regular file.
    Gone,
}

/// Everything detached by a subtree removal. The caller is responsible for
/// releasing the listed watches and dropping queue references.
#[derive(Debug, Default)]
pub struct RemovedSubtree {
    pub dirs: Vec<(DirId, Option<WatchDescriptor>)>,
    pub files: Vec<FileId>,
}

/// The forest rooted at one watched top directory.
#[derive(Debug)]
pub struct Tree {
    root: DirId,
    dirs: HashMap<DirId, DirNode>,
    files: HashMap<FileId, FileNode>,
    next_id: u64,
    max_depth: u32,
}

impl Tree {
    pub fn new(root_abs: PathBuf, max_depth: u32) -> Self {
        let root = DirId(0);
        let leaf = root_abs
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut dirs = HashMap::new();
        dirs.insert(
            root,
            DirNode {
                abs_path: root_abs,
                rel_path: String::new(),
                leaf,
                parent: None,
                depth: 0,
                watch: WatchState::Unwatched,
                files: BTreeMap::new(),
                subdirs: BTreeMap::new(),
                seen_in_rescan: false,
            },
        );
        Self {
            root,
            dirs,
            files: HashMap::new(),
            next_id: 1,
            max_depth,
        }
    }

    pub fn root(&self) -> DirId {
        self.root
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn dir(&self, id: DirId) -> Option<&DirNode> {
        self.dirs.get(&id)
    }

    pub fn dir_mut(&mut self, id: DirId) -> Option<&mut DirNode> {
        self.dirs.get_mut(&id)
    }

    pub fn file(&self, id: FileId) -> Option<&FileNode> {
        self.files.get(&id)
    }

    pub fn file_mut(&mut self, id: FileId) -> Option<&mut FileNode> {
        self.files.get_mut(&id)
    }

    pub fn lookup_subdir(&self, dir: DirId, leaf: &str) -> Option<DirId> {
        self.dirs.get(&dir)?.subdirs.get(leaf).copied()
    }

    pub fn lookup_file(&self, dir: DirId, leaf: &str) -> Option<FileId> {
        self.dirs.get(&dir)?.files.get(leaf).copied()
    }

    /// Snapshot of a directory's subdirectory ids, in leaf order.
    pub fn subdir_ids(&self, dir: DirId) -> Vec<DirId> {
        self.dirs
            .get(&dir)
            .map(|node| node.subdirs.values().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a directory's file ids, in leaf order.
    pub fn file_ids(&self, dir: DirId) -> Vec<FileId> {
        self.dirs
            .get(&dir)
            .map(|node| node.files.values().copied().collect())
            .unwrap_or_default()
    }

    fn alloc(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn child_paths(&self, parent: DirId, leaf: &str) -> Option<(PathBuf, String)> {
        let parent = self.dirs.get(&parent)?;
        let abs = parent.abs_path.join(leaf);
        let rel = if parent.rel_path.is_empty() {
            leaf.to_owned()
        } else {
            format!("{}/{leaf}", parent.rel_path)
        };
        Some((abs, rel))
    }

    /// Register a file under `dir`, returning the existing node when the
    /// leaf is already present.
    pub fn add_file(&mut self, dir: DirId, leaf: &str) -> Option<FileId> {
        if let Some(existing) = self.lookup_file(dir, leaf) {
            return Some(existing);
        }
        let (abs_path, rel_path) = self.child_paths(dir, leaf)?;
        let id = FileId(self.alloc());
        self.files.insert(
            id,
            FileNode {
                abs_path,
                rel_path,
                leaf: leaf.to_owned(),
                parent: dir,
                stamp: None,
                seen_in_rescan: false,
            },
        );
        self.dirs
            .get_mut(&dir)
            .map(|node| node.files.insert(leaf.to_owned(), id));
        Some(id)
    }

    /// Register a subdirectory under `parent`, returning the existing node
    /// when the leaf is already present. Refuses (returns `None`) when the
    /// child would sit deeper than the depth limit.
    pub fn add_dir(&mut self, parent: DirId, leaf: &str) -> Option<DirId> {
        if let Some(existing) = self.lookup_subdir(parent, leaf) {
            return Some(existing);
        }
        let depth = self.dirs.get(&parent)?.depth;
        if depth >= self.max_depth {
            tracing::debug!(parent = ?parent, leaf, "too deep, not adding");
            return None;
        }
        let (abs_path, rel_path) = self.child_paths(parent, leaf)?;
        let id = DirId(self.alloc());
        self.dirs.insert(
            id,
            DirNode {
                abs_path,
                rel_path,
                leaf: leaf.to_owned(),
                parent: Some(parent),
                depth: depth + 1,
                watch: WatchState::Unwatched,
                files: BTreeMap::new(),
                subdirs: BTreeMap::new(),
                seen_in_rescan: false,
            },
        );
        self.dirs
            .get_mut(&parent)
            .map(|node| node.subdirs.insert(leaf.to_owned(), id));
        Some(id)
    }

    /// Drop a file node and detach it from its parent's table.
    pub fn remove_file(&mut self, id: FileId) {
        let Some(node) = self.files.remove(&id) else {
            return;
        };
        if let Some(parent) = self.dirs.get_mut(&node.parent) {
            parent.files.remove(&node.leaf);
        }
        tracing::debug!(path = %node.rel_path, "removing from file list");
    }

    /// Drop a directory and everything beneath it, detaching the subtree
    /// root from its parent. Removing the root empties the whole arena.
    pub fn remove_dir(&mut self, id: DirId) -> RemovedSubtree {
        let mut removed = RemovedSubtree::default();
        let Some(node) = self.dirs.get(&id) else {
            return removed;
        };

        // Detach from the parent first so the walk below never has to
        // splice siblings mid-traversal.
        if let Some(parent) = node.parent {
            let leaf = node.leaf.clone();
            if let Some(parent) = self.dirs.get_mut(&parent) {
                parent.subdirs.remove(&leaf);
            }
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.dirs.remove(&current) else {
                continue;
            };
            let watch = match node.watch {
                WatchState::Watched(wd) => Some(wd),
                _ => None,
            };
            removed.dirs.push((current, watch));
            tracing::debug!(path = %node.rel_path, "removing from directory list");
            for file_id in node.files.values() {
                self.files.remove(file_id);
                removed.files.push(*file_id);
            }
            stack.extend(node.subdirs.values().copied());
        }
        removed
    }

    /// Stat the file and compare (mtime, size) with the recorded pair,
    /// updating the record when they differ.
    pub fn check_file_changed(&mut self, id: FileId) -> FileCheck {
        let Some(node) = self.files.get_mut(&id) else {
            return FileCheck::Gone;
        };
        let stamp = match stat_regular(&node.abs_path) {
            Some(stamp) => stamp,
            None => return FileCheck::Gone,
        };
        if node.stamp == Some(stamp) {
            return FileCheck::Unchanged;
        }
        tracing::debug!(path = %node.rel_path, "file changed");
        node.stamp = Some(stamp);
        FileCheck::Changed
    }
}

/// `(mtime, size)` of `path` when it is a regular file, `None` otherwise.
fn stat_regular(path: &Path) -> Option<FileStamp> {
    let meta = fs::symlink_metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    Some(FileStamp {
        mtime: meta.modified().ok()?,
        size: meta.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    fn tree() -> Tree {
        Tree::new(PathBuf::from("/watched"), 20)
    }

    #[test]
    fn root_has_empty_relative_path() {
        let t = tree();
        let root = t.dir(t.root()).unwrap();
        assert_eq!(root.rel_path, "");
        assert_eq!(root.depth, 0);
        assert!(root.parent.is_none());
    }

    #[test]
    fn add_file_is_idempotent_per_leaf() {
        let mut t = tree();
        let a = t.add_file(t.root(), "a.txt").unwrap();
        let b = t.add_file(t.root(), "a.txt").unwrap();
        assert_eq!(a, b);
        assert_eq!(t.dir(t.root()).unwrap().files.len(), 1);

        let node = t.file(a).unwrap();
        assert_eq!(node.rel_path, "a.txt");
        assert_eq!(node.abs_path, PathBuf::from("/watched/a.txt"));
        assert!(node.stamp.is_none());
    }

    #[test]
    fn nested_relative_paths_are_slash_joined() {
        let mut t = tree();
        let sub = t.add_dir(t.root(), "sub").unwrap();
        let deep = t.add_dir(sub, "deep").unwrap();
        let f = t.add_file(deep, "b").unwrap();

        assert_eq!(t.dir(sub).unwrap().rel_path, "sub");
        assert_eq!(t.dir(deep).unwrap().rel_path, "sub/deep");
        assert_eq!(t.dir(deep).unwrap().depth, 2);
        assert_eq!(t.file(f).unwrap().rel_path, "sub/deep/b");
    }

    #[test]
    fn add_dir_refuses_past_depth_limit() {
        let mut t = Tree::new(PathBuf::from("/watched"), 2);
        let one = t.add_dir(t.root(), "one").unwrap();
        let two = t.add_dir(one, "two").unwrap();
        assert_eq!(t.dir(two).unwrap().depth, 2);
        // A child of a dir at max depth is refused.
        assert!(t.add_dir(two, "three").is_none());
    }

    #[test]
    fn remove_dir_detaches_whole_subtree() {
        let mut t = tree();
        let sub = t.add_dir(t.root(), "sub").unwrap();
        let deep = t.add_dir(sub, "deep").unwrap();
        let f1 = t.add_file(sub, "one").unwrap();
        let f2 = t.add_file(deep, "two").unwrap();

        let removed = t.remove_dir(sub);
        let removed_dirs: Vec<DirId> = removed.dirs.iter().map(|(id, _)| *id).collect();
        assert!(removed_dirs.contains(&sub));
        assert!(removed_dirs.contains(&deep));
        assert!(removed.files.contains(&f1));
        assert!(removed.files.contains(&f2));

        assert!(t.dir(sub).is_none());
        assert!(t.dir(deep).is_none());
        assert!(t.file(f1).is_none());
        assert!(t.file(f2).is_none());
        assert!(t.dir(t.root()).unwrap().subdirs.is_empty());
    }

    #[test]
    fn remove_file_detaches_from_parent() {
        let mut t = tree();
        let f = t.add_file(t.root(), "gone").unwrap();
        t.remove_file(f);
        assert!(t.file(f).is_none());
        assert!(t.lookup_file(t.root(), "gone").is_none());
    }

    #[test]
    fn check_file_changed_tracks_mtime_and_size() {
        let dir = TempDir::new().unwrap();
        let mut t = Tree::new(dir.path().to_path_buf(), 20);
        fs::write(dir.path().join("data"), "v1").unwrap();

        let f = t.add_file(t.root(), "data").unwrap();
        // First observation of a fresh node is a change.
        assert_eq!(t.check_file_changed(f), FileCheck::Changed);
        assert_eq!(t.check_file_changed(f), FileCheck::Unchanged);

        fs::write(dir.path().join("data"), "longer contents").unwrap();
        assert_eq!(t.check_file_changed(f), FileCheck::Changed);
        assert_eq!(t.check_file_changed(f), FileCheck::Unchanged);

        fs::remove_file(dir.path().join("data")).unwrap();
        assert_eq!(t.check_file_changed(f), FileCheck::Gone);
    }

    #[test]
    fn check_file_changed_rejects_non_regular_files() {
        let dir = TempDir::new().unwrap();
        let mut t = Tree::new(dir.path().to_path_buf(), 20);
        fs::create_dir(dir.path().join("actually-a-dir")).unwrap();

        let f = t.add_file(t.root(), "actually-a-dir").unwrap();
        assert_eq!(t.check_file_changed(f), FileCheck::Gone);
    }
}
