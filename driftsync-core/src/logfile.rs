//! Per-set operational log appends.
//!
//! Each line is prefixed with a local timestamp and written while holding an
//! exclusive `flock(2)` on the log file, so interleaved writers (supervisor
//! and watcher child share one log) never tear each other's lines.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::SystemTime;

use crate::timefmt::format_timestamp;

/// Append one timestamped line to the set's log file.
///
/// A `None` path means no log file is configured and the line is dropped.
/// Failures are reported through `tracing` and never propagate; losing a log
/// line must not disturb a sync in progress.
pub fn append_log(path: Option<&Path>, line: &str) {
    let Some(path) = path else {
        return;
    };

    let mut file = match OpenOptions::new().append(true).create(true).open(path) {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot open log file");
            return;
        }
    };

    let _guard = match LockGuard::exclusive(&file) {
        Ok(guard) => guard,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot lock log file");
            return;
        }
    };

    let stamped = format!("[{}] {line}\n", format_timestamp(SystemTime::now()));
    if let Err(err) = file.write_all(stamped.as_bytes()) {
        tracing::warn!(path = %path.display(), error = %err, "log write failed");
    }
}

/// Exclusive advisory lock on an open file, released on drop.
struct LockGuard {
    fd: std::os::unix::io::RawFd,
}

impl LockGuard {
    fn exclusive(file: &impl AsRawFd) -> std::io::Result<Self> {
        let fd = file.as_raw_fd();
        if unsafe { libc::flock(fd, libc::LOCK_EX) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { fd })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.fd, libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    #[test]
    fn appends_timestamped_lines() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("set.log");

        append_log(Some(&log), "[mirror] process started");
        append_log(Some(&log), "[mirror] full sync: sync starting");

        let contents = fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("[mirror] process started"));
        // "[YYYY-MM-DD HH:MM:SS] " prefix is 22 characters.
        assert_eq!(&lines[1][21..22], " ");
    }

    #[test]
    fn no_log_path_is_a_noop() {
        append_log(None, "dropped");
    }
}
