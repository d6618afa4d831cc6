//! Kernel notification plumbing: the inotify handle and the reverse map
//! from watch descriptor to directory node.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};

use crate::tree::DirId;

/// Per-directory subscription mask.
const DIR_WATCH_MASK: WatchMask = WatchMask::CREATE
    .union(WatchMask::DELETE)
    .union(WatchMask::MODIFY)
    .union(WatchMask::DELETE_SELF)
    .union(WatchMask::MOVED_FROM)
    .union(WatchMask::MOVED_TO);

/// One event batch buffer; matches the kernel-recommended read size.
const EVENT_BUFFER_SIZE: usize = 8192;

/// Outcome of waiting for the notification handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Events are waiting to be read.
    Ready,
    /// The wait elapsed without events.
    TimedOut,
    /// Notifications are disabled; the caller should sleep instead.
    Disabled,
    /// The wait was interrupted or failed; the loop should exit.
    Interrupted,
}

/// An event lifted out of the kernel buffer so it can outlive the read.
#[derive(Debug, Clone)]
pub struct DirEvent {
    pub wd: WatchDescriptor,
    pub mask: EventMask,
    pub name: Option<String>,
}

/// The kernel notification handle, or the degraded polling-only mode when
/// inotify is unavailable or its read stream breaks.
#[derive(Debug)]
pub struct Notifier {
    inner: Option<Inotify>,
}

impl Notifier {
    /// Initialise inotify; on failure, log and start in polling-only mode.
    pub fn init() -> Self {
        match Inotify::init() {
            Ok(inner) => Self { inner: Some(inner) },
            Err(err) => {
                tracing::error!(error = %err, "inotify unavailable, falling back to rescans");
                Self { inner: None }
            }
        }
    }

    /// A notifier with no kernel handle, for polling-only operation.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Subscribe to `path`. Returns `None` (after logging) on failure, which
    /// callers record as a failed install attempt.
    pub fn add_watch(&mut self, path: &Path) -> Option<WatchDescriptor> {
        let inner = self.inner.as_mut()?;
        match inner.watches().add(path, DIR_WATCH_MASK) {
            Ok(wd) => Some(wd),
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "inotify_add_watch failed");
                None
            }
        }
    }

    /// Drop a subscription. `EINVAL` is ignored because the directory may
    /// already be gone, taking its watch with it.
    pub fn remove_watch(&mut self, wd: WatchDescriptor) {
        let Some(inner) = self.inner.as_mut() else {
            return;
        };
        if let Err(err) = inner.watches().remove(wd) {
            if err.raw_os_error() != Some(libc::EINVAL) {
                tracing::error!(error = %err, "inotify_rm_watch failed");
            }
        }
    }

    /// Wait up to `timeout` for the handle to become readable.
    pub fn wait_readable(&self, timeout: Duration) -> Readiness {
        let Some(inner) = self.inner.as_ref() else {
            return Readiness::Disabled;
        };

        let mut pollfd = libc::pollfd {
            fd: inner.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                tracing::error!(error = %err, "poll on inotify handle failed");
            }
            return Readiness::Interrupted;
        }
        if rc == 0 {
            return Readiness::TimedOut;
        }
        Readiness::Ready
    }

    /// Read one batch of events. A read error closes the handle and
    /// degrades the watcher to polling-only operation.
    pub fn read_batch(&mut self) -> Vec<DirEvent> {
        let outcome = {
            let Some(inner) = self.inner.as_mut() else {
                return Vec::new();
            };
            let mut buffer = [0u8; EVENT_BUFFER_SIZE];
            inner.read_events(&mut buffer).map(|events| {
                events
                    .map(|event| DirEvent {
                        wd: event.wd.clone(),
                        mask: event.mask,
                        name: event
                            .name
                            .map(|name: &OsStr| name.to_string_lossy().into_owned()),
                    })
                    .collect::<Vec<_>>()
            })
        };

        match outcome {
            Ok(events) => events,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Vec::new(),
            Err(err) => {
                tracing::error!(error = %err, "inotify read failed, degrading to rescans");
                self.inner = None;
                Vec::new()
            }
        }
    }
}

/// Reverse map from kernel watch descriptor to directory node.
#[derive(Debug, Default)]
pub struct WatchIndex {
    map: HashMap<WatchDescriptor, DirId>,
}

impl WatchIndex {
    pub fn insert(&mut self, wd: WatchDescriptor, dir: DirId) {
        self.map.insert(wd, dir);
    }

    pub fn remove(&mut self, wd: &WatchDescriptor) {
        self.map.remove(wd);
    }

    pub fn lookup(&self, wd: &WatchDescriptor) -> Option<DirId> {
        self.map.get(wd).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
