//! The per-set supervisor loop.
//!
//! One supervisor owns one sync set: it keeps a watcher child alive while
//! partial syncs are enabled, interleaves full and partial transfers on
//! their own schedules, serializes them through the sync lock, and keeps
//! the status file current across every state transition.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use driftsync_core::fsutil::{recursively_delete, touch_marker};
use driftsync_core::logfile::append_log;
use driftsync_core::timefmt::format_timestamp;
use driftsync_core::SyncSet;

use crate::collate::collate_transfer_list;
use crate::error::{io_err, SupervisorError};
use crate::lock::SyncLock;
use crate::rsync::{run_rsync, DEFAULT_FULL_OPTS, DEFAULT_PARTIAL_OPTS};
use crate::status::{write_status_file, Action, SyncStatus};

/// Delay before retrying after a failed source validation blocks the
/// watcher from starting.
const WATCHER_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Lines of the transfer list copied into the log before a partial sync.
const TRANSFER_LOG_LIMIT: usize = 100;

/// Scratch paths resolved for one supervisor run.
#[derive(Debug)]
struct Workspace {
    workdir: PathBuf,
    excludes_file: PathBuf,
    stderr_file: PathBuf,
    transfer_list: PathBuf,
    change_queue: PathBuf,
}

impl Workspace {
    fn create(set: &SyncSet) -> Result<Self, SupervisorError> {
        let parent = set
            .tempdir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        let workdir = tempfile::Builder::new()
            .prefix("sync")
            .tempdir_in(&parent)
            .map_err(|e| io_err(&parent, e))?
            .keep();
        tracing::debug!(path = %workdir.display(), "temporary working directory");

        let excludes_file = workdir.join("excludes");
        let mut patterns = String::new();
        if set.excludes.is_empty() {
            patterns.push_str("*.tmp\n*~\n");
        } else {
            for pattern in &set.excludes {
                patterns.push_str(pattern);
                patterns.push('\n');
            }
        }
        fs::write(&excludes_file, patterns).map_err(|e| io_err(&excludes_file, e))?;

        let transfer_list = set
            .transfer_list
            .clone()
            .unwrap_or_else(|| workdir.join("transfer"));

        let change_queue = match &set.change_queue {
            Some(dir) => dir.clone(),
            None => {
                let dir = workdir.join("changes");
                fs::create_dir(&dir).map_err(|e| io_err(&dir, e))?;
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))
                    .map_err(|e| io_err(&dir, e))?;
                dir
            }
        };

        Ok(Self {
            stderr_file: workdir.join("rsync-stderr"),
            workdir,
            excludes_file,
            transfer_list,
            change_queue,
        })
    }
}

/// Run one sync set until the exit flag is raised.
///
/// Only setup failures (no working directory, unwritable scratch files)
/// return an error; once the loop runs, transfer and validation failures
/// are rescheduled with their retry intervals instead of propagating.
pub fn supervise_set(set: &SyncSet, exit: &Arc<AtomicBool>) -> Result<(), SupervisorError> {
    let ws = Workspace::create(set)?;
    let mut st = SyncStatus::new(ws.workdir.clone());
    let mut watcher: Option<Child> = None;

    log(set, "process started");
    seed_from_markers(set, &mut st);
    update_status(set, &st, exit);

    while !exit.load(Ordering::SeqCst) {
        let mut check_workdir = false;

        // Keep a watcher child alive while partial syncs are enabled.
        if watcher.is_none() && set.partial_interval > 0 {
            if run_validation(
                set,
                set.source_validation.as_deref(),
                "source",
                &mut st,
                Action::ValidateSource,
                exit,
            ) {
                match spawn_watcher(set, &ws) {
                    Ok(child) => {
                        log(set, &format!("started new watcher: {}", child.id()));
                        st.watcher_pid = Some(child.id());
                        watcher = Some(child);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to start watcher");
                        log(set, &format!("failed to start watcher: {err}"));
                    }
                }
            } else {
                st.action = Action::Waiting;
                update_status(set, &st, exit);
                sleep_checked(WATCHER_RETRY_DELAY, exit);
            }
        }

        // Full sync on its own schedule.
        if set.full_interval > 0 && due(st.next_full_sync) {
            check_workdir = true;
            let validated = run_validation(
                set,
                set.source_validation.as_deref(),
                "source",
                &mut st,
                Action::ValidateSource,
                exit,
            ) && run_validation(
                set,
                set.destination_validation.as_deref(),
                "destination",
                &mut st,
                Action::ValidateDestination,
                exit,
            );

            if !validated {
                st.next_full_sync = Some(SystemTime::now() + Duration::from_secs(set.full_retry));
            } else if sync_full(set, &ws, &mut st, exit) == 0 {
                st.next_full_sync =
                    Some(SystemTime::now() + Duration::from_secs(set.full_interval));
            } else {
                st.next_full_sync = Some(SystemTime::now() + Duration::from_secs(set.full_retry));
                st.last_failed_full_sync = Some(SystemTime::now());
                st.full_sync_failures += 1;
                st.last_full_sync_status = "FAILED";
            }
            st.action = Action::Waiting;
            update_status(set, &st, exit);
        }

        // Partial sync, only while a watcher feeds the change queue.
        if watcher.is_some() && due(st.next_partial_sync) {
            check_workdir = true;
            let validated = run_validation(
                set,
                set.source_validation.as_deref(),
                "source",
                &mut st,
                Action::ValidateSource,
                exit,
            ) && run_validation(
                set,
                set.destination_validation.as_deref(),
                "destination",
                &mut st,
                Action::ValidateDestination,
                exit,
            );

            if !validated {
                st.next_partial_sync =
                    Some(SystemTime::now() + Duration::from_secs(set.partial_retry));
            } else if sync_partial(set, &ws, &mut st, exit) == 0 {
                // Succeeded, or there was nothing to transfer.
                st.next_partial_sync =
                    Some(SystemTime::now() + Duration::from_secs(set.partial_interval));
            } else {
                st.next_partial_sync =
                    Some(SystemTime::now() + Duration::from_secs(set.partial_retry));
                st.last_failed_partial_sync = Some(SystemTime::now());
                st.partial_sync_failures += 1;
                st.last_partial_sync_status = "FAILED";
            }
            st.action = Action::Waiting;
            update_status(set, &st, exit);
        }

        // Reap the watcher child if it exited.
        if let Some(child) = watcher.as_mut() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                check_workdir = true;
                log(set, "watcher process ended");
                watcher = None;
                st.watcher_pid = None;
            }
        }

        // Losing the working directory means external cleanup took the
        // scratch space; only checked after real work to bound stat calls.
        if check_workdir && fs::metadata(&ws.workdir).is_err() {
            log(set, "working directory disappeared - exiting");
            exit.store(true, Ordering::SeqCst);
        }

        if !exit.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    // Forward termination to the watcher without waiting for it.
    if let Some(child) = watcher.as_ref() {
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
    }

    recursively_delete(&ws.workdir);
    if let Some(status_file) = &set.status_file {
        let _ = fs::remove_file(status_file);
    }
    log(set, "process ended");
    Ok(())
}

/// Marker-file mtimes seed the next sync times so a restart does not
/// immediately re-run transfers that recently succeeded.
fn seed_from_markers(set: &SyncSet, st: &mut SyncStatus) {
    if let Some(marker) = &set.full_marker {
        if let Ok(mtime) = fs::metadata(marker).and_then(|meta| meta.modified()) {
            let next = mtime + Duration::from_secs(set.full_interval);
            st.next_full_sync = Some(next);
            log(
                set,
                &format!(
                    "used full sync marker file - next full sync: {}",
                    format_timestamp(next)
                ),
            );
        }
    }
    if let Some(marker) = &set.partial_marker {
        if let Ok(mtime) = fs::metadata(marker).and_then(|meta| meta.modified()) {
            let next = mtime + Duration::from_secs(set.partial_interval);
            st.next_partial_sync = Some(next);
            log(
                set,
                &format!(
                    "used partial sync marker file - next partial sync: {}",
                    format_timestamp(next)
                ),
            );
        }
    }
}

fn due(next: Option<SystemTime>) -> bool {
    next.map_or(true, |at| SystemTime::now() >= at)
}

fn sleep_checked(total: Duration, exit: &Arc<AtomicBool>) {
    let step = Duration::from_millis(100);
    let mut slept = Duration::ZERO;
    while slept < total && !exit.load(Ordering::SeqCst) {
        std::thread::sleep(step);
        slept += step;
    }
}

fn log(set: &SyncSet, message: &str) {
    append_log(
        set.log_file.as_deref(),
        &format!("[{}] {message}", set.name),
    );
}

fn update_status(set: &SyncSet, st: &SyncStatus, exit: &Arc<AtomicBool>) {
    if exit.load(Ordering::SeqCst) {
        return;
    }
    if let Some(path) = &set.status_file {
        write_status_file(path, &set.name, st);
    }
}

/// Run a validation command through the shell, if one is configured.
///
/// Returns `true` when there is nothing to run or the command succeeded.
/// Termination by signal is read as a request to stop the whole set.
fn run_validation(
    set: &SyncSet,
    command: Option<&str>,
    what: &str,
    st: &mut SyncStatus,
    action: Action,
    exit: &Arc<AtomicBool>,
) -> bool {
    let Some(command) = command else {
        return true;
    };

    tracing::debug!(set = %set.name, what, command, "running validation");
    st.action = action;
    update_status(set, st, exit);

    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .status();

    match status {
        Err(err) => {
            log(set, &format!("{what}: validation command failed to run: {err}"));
            false
        }
        Ok(status) => {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                log(
                    set,
                    &format!("{what}: validation command received a signal: {signal}"),
                );
                exit.store(true, Ordering::SeqCst);
                false
            } else if status.success() {
                true
            } else {
                log(
                    set,
                    &format!(
                        "{what}: validation command gave non-zero exit status: {}",
                        status.code().unwrap_or(-1)
                    ),
                );
                false
            }
        }
    }
}

/// Start the watcher as a child process running this executable's `watch`
/// subcommand against the source tree and the change-queue directory.
fn spawn_watcher(set: &SyncSet, ws: &Workspace) -> std::io::Result<Child> {
    let exe = std::env::current_exe()?;
    let mut command = Command::new(exe);
    command
        .arg("watch")
        .arg("--full-scan-interval")
        .arg(set.full_interval.to_string())
        .arg("--queue-run-interval")
        .arg("2")
        .arg("--queue-run-max")
        .arg("5")
        .arg("--dump-interval")
        .arg(set.partial_interval.to_string())
        .arg("--recursion-depth")
        .arg(set.recursion_depth.to_string());
    for pattern in &set.excludes {
        command.arg("--exclude").arg(pattern);
    }
    command
        .arg(&set.source)
        .arg(&ws.change_queue)
        .stdin(Stdio::null());
    command.spawn()
}

/// Run a full sync, returning the rsync exit status (0 on success).
fn sync_full(set: &SyncSet, ws: &Workspace, st: &mut SyncStatus, exit: &Arc<AtomicBool>) -> i32 {
    let mut lock = None;
    if let Some(lock_path) = &set.sync_lock {
        st.action = Action::FullAwaitingLock;
        update_status(set, st, exit);
        log(set, "full sync: acquiring sync lock");
        lock = SyncLock::acquire(lock_path);
        if lock.is_some() {
            log(set, "full sync: sync lock acquired");
        }
    }

    st.action = Action::Full;
    update_status(set, st, exit);
    log(set, "full sync: sync starting");

    let options = set.full_rsync_opts.as_deref().unwrap_or(DEFAULT_FULL_OPTS);
    let rc = run_rsync(set, options, None, &ws.excludes_file, &ws.stderr_file);

    log(
        set,
        &format!(
            "full sync: sync ended: {}",
            if rc == 0 { "OK" } else { "FAILED" }
        ),
    );
    drop(lock);

    if rc == 0 {
        if let Some(marker) = &set.full_marker {
            if let Err(err) = touch_marker(marker) {
                log(set, &format!("{}: {err}", marker.display()));
            }
        }
        st.last_full_sync = Some(SystemTime::now());
        st.full_sync_failures = 0;
        st.last_full_sync_status = "OK";
    }
    rc
}

/// Run a partial sync. Returns 0 when there was nothing to transfer or the
/// transfer succeeded, nonzero when a transfer ran and failed.
fn sync_partial(set: &SyncSet, ws: &Workspace, st: &mut SyncStatus, exit: &Arc<AtomicBool>) -> i32 {
    if let Err(err) = collate_transfer_list(&set.source, &ws.change_queue, &ws.transfer_list) {
        tracing::error!(error = %err, "transfer list collation failed");
        return 0;
    }

    let list_len = fs::metadata(&ws.transfer_list)
        .map(|meta| meta.len())
        .unwrap_or(0);
    if list_len == 0 {
        return 0;
    }

    let mut lock = None;
    if let Some(lock_path) = &set.sync_lock {
        st.action = Action::PartialAwaitingLock;
        update_status(set, st, exit);
        log(set, "partial sync: acquiring sync lock");
        lock = SyncLock::acquire(lock_path);
        if lock.is_some() {
            log(set, "partial sync: sync lock acquired");
        }
    }

    st.action = Action::Partial;
    update_status(set, st, exit);
    log(set, "partial sync: sync starting");
    log_transfer_preview(set, &ws.transfer_list);

    let options = set
        .partial_rsync_opts
        .as_deref()
        .unwrap_or(DEFAULT_PARTIAL_OPTS);
    let rc = run_rsync(
        set,
        options,
        Some(&ws.transfer_list),
        &ws.excludes_file,
        &ws.stderr_file,
    );

    log(
        set,
        &format!(
            "partial sync: sync ended: {}",
            if rc == 0 { "OK" } else { "FAILED" }
        ),
    );
    drop(lock);

    let _ = fs::remove_file(&ws.transfer_list);

    if rc == 0 {
        if let Some(marker) = &set.partial_marker {
            if let Err(err) = touch_marker(marker) {
                log(set, &format!("{}: {err}", marker.display()));
            }
        }
        st.last_partial_sync = Some(SystemTime::now());
        st.partial_sync_failures = 0;
        st.last_partial_sync_status = "OK";
    }
    rc
}

/// Copy the head of the transfer list into the log, capped so one giant
/// batch cannot swamp the log file.
fn log_transfer_preview(set: &SyncSet, transfer_list: &Path) {
    let Ok(file) = File::open(transfer_list) else {
        return;
    };
    for (index, line) in BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .enumerate()
    {
        if index >= TRANSFER_LOG_LIMIT {
            append_log(set.log_file.as_deref(), &format!("[{}]   ...", set.name));
            break;
        }
        append_log(set.log_file.as_deref(), &format!("[{}]   {line}", set.name));
    }
}
