//! Changed-path accumulation and batch publishing.
//!
//! Paths collect in insertion order with string-equality dedup; directory
//! paths carry a trailing `/`. Batches are published atomically under a
//! `YYYYMMDD-HHMMSS.<pid>` name so readers of the output directory only
//! ever see fully-formed files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use driftsync_core::fsutil::atomic_publish;
use driftsync_core::timefmt::compact_stamp;

use crate::error::WatcherError;

#[derive(Debug, Default)]
pub struct ChangedPaths {
    paths: Vec<String>,
    seen: HashSet<String>,
}

impl ChangedPaths {
    /// Record a changed path. Directories are suffixed with `/`; the watched
    /// root itself (empty relative path) becomes the single line `/`.
    pub fn mark(&mut self, rel_path: &str, is_dir: bool) {
        let entry = if is_dir {
            format!("{rel_path}/")
        } else {
            rel_path.to_owned()
        };
        if self.seen.contains(&entry) {
            return;
        }
        tracing::debug!(path = %entry, "adding to changed paths");
        self.seen.insert(entry.clone());
        self.paths.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[String] {
        &self.paths
    }

    /// Publish the accumulated paths as one batch file in `out_dir`.
    ///
    /// Returns the published path, or `None` when there was nothing to
    /// write. The accumulator is cleared only after a successful publish, so
    /// a failed attempt retries with the same contents on the next tick.
    pub fn dump(&mut self, out_dir: &Path) -> Result<Option<PathBuf>, WatcherError> {
        if self.paths.is_empty() {
            return Ok(None);
        }

        let name = format!(
            "{}.{}",
            compact_stamp(SystemTime::now()),
            std::process::id()
        );
        let target = out_dir.join(name);

        let mut contents = String::new();
        for path in &self.paths {
            contents.push_str(path);
            contents.push('\n');
        }

        atomic_publish(&target, contents.as_bytes())?;

        self.paths.clear();
        self.seen.clear();
        Ok(Some(target))
    }
}
