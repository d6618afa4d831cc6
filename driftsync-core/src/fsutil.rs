//! Filesystem helpers: atomic publishing, marker files, bounded deletes.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use filetime::FileTime;
use tempfile::Builder;

use crate::error::{io_err, CoreError};

/// Directory recursion cap for [`recursively_delete`].
const DELETE_MAX_DEPTH: u32 = 10;

/// `PATH` value installed when the environment does not provide one.
const FALLBACK_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Publish `contents` at `path` so that readers only ever see a complete
/// file.
///
/// The bytes are first written to a hidden `.{leaf}XXXXXX` temporary file
/// created securely in the same directory, which is then renamed onto the
/// final name. On any failure the temporary file is removed and the final
/// path is left untouched.
pub fn atomic_publish(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    let dir = path.parent().ok_or_else(|| {
        io_err(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
        )
    })?;
    let leaf = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            io_err(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no leaf name"),
            )
        })?;

    let mut tmp = Builder::new()
        .prefix(&format!(".{leaf}"))
        .tempfile_in(dir)
        .map_err(|e| io_err(dir, e))?;
    tmp.write_all(contents).map_err(|e| io_err(tmp.path(), e))?;
    tmp.flush().map_err(|e| io_err(tmp.path(), e))?;

    // Dropping the NamedTempFile on the error path removes the scratch file.
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}

/// Create `path` if needed and set its modification time to now.
///
/// Marker files are zero-length; only their mtime carries information.
pub fn touch_marker(path: &Path) -> Result<(), CoreError> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    filetime::set_file_mtime(path, FileTime::now()).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Delete `dir` and everything inside it, descending at most ten levels.
///
/// Individual failures are logged and skipped; the walk never aborts early.
pub fn recursively_delete(dir: &Path) {
    delete_level(dir, 0);
}

fn delete_level(dir: &Path, depth: u32) {
    if depth >= DELETE_MAX_DEPTH {
        return;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(path = %dir.display(), error = %err, "read_dir failed during delete");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "lstat failed during delete");
                continue;
            }
        };
        if meta.is_dir() {
            delete_level(&path, depth + 1);
        } else if let Err(err) = fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %err, "unlink failed during delete");
        }
    }

    if let Err(err) = fs::remove_dir(dir) {
        tracing::warn!(path = %dir.display(), error = %err, "rmdir failed during delete");
    }
}

/// Install a standard `PATH` when the environment does not define one, so
/// external commands can still be resolved.
pub fn ensure_path_env() {
    if env::var_os("PATH").is_none() {
        env::set_var("PATH", FALLBACK_PATH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    #[test]
    fn atomic_publish_creates_file_and_cleans_scratch() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("batch.list");
        atomic_publish(&target, b"a.txt\nsub/\n").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "a.txt\nsub/\n");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "no hidden scratch file should remain");
    }

    #[test]
    fn atomic_publish_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("state");
        atomic_publish(&target, b"one").unwrap();
        atomic_publish(&target, b"two").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "two");
    }

    #[test]
    fn touch_marker_creates_empty_file_with_fresh_mtime() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("full.marker");
        touch_marker(&marker).unwrap();

        let meta = fs::metadata(&marker).unwrap();
        assert_eq!(meta.len(), 0);
        let age = SystemTime::now()
            .duration_since(meta.modified().unwrap())
            .unwrap_or_default();
        assert!(age < Duration::from_secs(5));
    }

    #[test]
    fn touch_marker_updates_mtime_of_existing_file() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("partial.marker");
        fs::write(&marker, "").unwrap();
        filetime::set_file_mtime(&marker, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        touch_marker(&marker).unwrap();
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&marker).unwrap());
        assert!(mtime.unix_seconds() > 1_000_000);
    }

    #[test]
    fn recursive_delete_removes_nested_tree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("work");
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/file"), "x").unwrap();
        fs::write(root.join("a/b/c/deep"), "y").unwrap();

        recursively_delete(&root);
        assert!(!root.exists());
    }

    #[test]
    fn recursive_delete_stops_at_depth_cap() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("deep");
        let mut path = root.clone();
        for level in 0..12 {
            path = path.join(format!("d{level}"));
        }
        fs::create_dir_all(&path).unwrap();

        recursively_delete(&root);
        // The walk gives up past ten levels, so the root cannot be removed.
        assert!(root.exists());
    }
}
