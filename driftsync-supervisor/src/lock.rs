//! The sync lock: an exclusive advisory lock serializing competing
//! transfers of one set (and of overlapping sets sharing a lock path).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Held for the duration of one transfer; released on drop.
#[derive(Debug)]
pub struct SyncLock {
    file: File,
}

impl SyncLock {
    /// Open (creating if needed) and exclusively lock `path`, blocking
    /// until the lock is granted.
    ///
    /// Returns `None` when the lock file cannot even be opened; the caller
    /// proceeds unlocked in that case, which is how the transfer behaved
    /// before a lock was configured.
    pub fn acquire(path: &Path) -> Option<Self> {
        let file = match OpenOptions::new()
            .append(true)
            .create(true)
            .mode(0o600)
            .open(path)
        {
            Ok(file) => file,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "cannot open sync lock");
                return None;
            }
        };

        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } != 0 {
            let err = std::io::Error::last_os_error();
            tracing::warn!(path = %path.display(), error = %err, "sync lock acquisition failed");
        }
        Some(Self { file })
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
