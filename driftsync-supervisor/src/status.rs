//! Supervisor state and the human-readable status file.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use driftsync_core::fsutil::atomic_publish;
use driftsync_core::timefmt::format_timestamp_or_dash;

/// What the supervisor is doing right now, as shown in the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Waiting,
    ValidateSource,
    ValidateDestination,
    FullAwaitingLock,
    Full,
    PartialAwaitingLock,
    Partial,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::Waiting => "-",
            Action::ValidateSource => "VALIDATE-SOURCE",
            Action::ValidateDestination => "VALIDATE-DESTINATION",
            Action::FullAwaitingLock => "SYNC-FULL-AWAITING-LOCK",
            Action::Full => "SYNC-FULL",
            Action::PartialAwaitingLock => "SYNC-PARTIAL-AWAITING-LOCK",
            Action::Partial => "SYNC-PARTIAL",
        }
    }
}

/// Bookkeeping for one running sync set.
#[derive(Debug)]
pub struct SyncStatus {
    pub action: Action,
    pub pid: u32,
    pub watcher_pid: Option<u32>,
    pub next_full_sync: Option<SystemTime>,
    pub next_partial_sync: Option<SystemTime>,
    pub last_full_sync: Option<SystemTime>,
    pub last_partial_sync: Option<SystemTime>,
    pub last_failed_full_sync: Option<SystemTime>,
    pub last_failed_partial_sync: Option<SystemTime>,
    pub last_full_sync_status: &'static str,
    pub last_partial_sync_status: &'static str,
    pub full_sync_failures: u32,
    pub partial_sync_failures: u32,
    pub workdir: PathBuf,
}

impl SyncStatus {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            action: Action::Waiting,
            pid: std::process::id(),
            watcher_pid: None,
            next_full_sync: None,
            next_partial_sync: None,
            last_full_sync: None,
            last_partial_sync: None,
            last_failed_full_sync: None,
            last_failed_partial_sync: None,
            last_full_sync_status: "-",
            last_partial_sync_status: "-",
            full_sync_failures: 0,
            partial_sync_failures: 0,
            workdir,
        }
    }
}

/// Render the fixed `key : value` sequence, trailing blank line included so
/// concatenating every status file in a run directory stays readable.
pub fn render_status(section: &str, st: &SyncStatus) -> String {
    let mut out = String::new();
    let mut line = |key: &str, value: String| {
        out.push_str(&format!("{key:<24} : {value}\n"));
    };

    line("section", section.to_owned());
    line("current action", st.action.label().to_owned());
    line("sync process", st.pid.to_string());
    line(
        "watcher process",
        st.watcher_pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_owned()),
    );
    line(
        "last full sync status",
        st.last_full_sync_status.to_owned(),
    );
    line(
        "last partial sync status",
        st.last_partial_sync_status.to_owned(),
    );
    line("last full sync", format_timestamp_or_dash(st.last_full_sync));
    line(
        "last partial sync",
        format_timestamp_or_dash(st.last_partial_sync),
    );
    line("next full sync", format_timestamp_or_dash(st.next_full_sync));
    line(
        "next partial sync",
        format_timestamp_or_dash(st.next_partial_sync),
    );
    line(
        "failed full sync",
        format_timestamp_or_dash(st.last_failed_full_sync),
    );
    line(
        "failed partial sync",
        format_timestamp_or_dash(st.last_failed_partial_sync),
    );
    line(
        "partial sync failures",
        st.partial_sync_failures.to_string(),
    );
    line("full sync failures", st.full_sync_failures.to_string());
    line("working directory", st.workdir.display().to_string());
    out.push('\n');
    out
}

/// Atomically republish the status file. Failures are logged and swallowed:
/// status reporting must never disturb the sync itself.
pub fn write_status_file(path: &Path, section: &str, st: &SyncStatus) {
    let rendered = render_status(section, st);
    if let Err(err) = atomic_publish(path, rendered.as_bytes()) {
        tracing::warn!(path = %path.display(), error = %err, "status file update failed");
        return;
    }
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o644)) {
        tracing::warn!(path = %path.display(), error = %err, "status file chmod failed");
    }
}
