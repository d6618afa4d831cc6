//! Invocation of the external transfer tool.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::{Command, Stdio};

use driftsync_core::logfile::append_log;
use driftsync_core::SyncSet;

/// rsync options used for a full sync when the set does not override them.
pub const DEFAULT_FULL_OPTS: &str = "--delete -axH";
/// rsync options used for a partial sync when the set does not override
/// them. Unlike the full default this carries no `-x`; the watcher already
/// refuses to cross filesystems.
pub const DEFAULT_PARTIAL_OPTS: &str = "--delete -dlptgoDH";

/// Assemble the rsync argument vector: options, then `--files-from` for a
/// partial transfer, then the excludes file, then source and destination.
pub(crate) fn rsync_args(
    options: &str,
    transfer_list: Option<&Path>,
    excludes_file: &Path,
    source: &Path,
    destination: &str,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = options.split_whitespace().map(Into::into).collect();
    if let Some(list) = transfer_list {
        args.push("--files-from".into());
        args.push(list.into());
    }
    args.push("--exclude-from".into());
    args.push(excludes_file.into());
    args.push(source.into());
    args.push(destination.into());
    args
}

/// Run rsync, capturing its stderr into `stderr_file`, and return the exit
/// status (-1 when the process could not be run at all).
///
/// When the captured stderr is non-empty it is replayed line by line into
/// the set's log file together with the exit status, so a failed transfer
/// leaves a usable trace.
pub(crate) fn run_rsync(
    set: &SyncSet,
    options: &str,
    transfer_list: Option<&Path>,
    excludes_file: &Path,
    stderr_file: &Path,
) -> i32 {
    let _ = fs::remove_file(stderr_file);

    let stderr = match OpenOptions::new()
        .create(true)
        .write(true)
        .mode(0o600)
        .open(stderr_file)
    {
        Ok(file) => Stdio::from(file),
        Err(err) => {
            tracing::warn!(path = %stderr_file.display(), error = %err, "cannot capture rsync stderr");
            Stdio::null()
        }
    };

    let args = rsync_args(options, transfer_list, excludes_file, &set.source, &set.destination);
    tracing::debug!(?args, "spawning rsync");

    let status = Command::new("rsync")
        .args(&args)
        .stdin(Stdio::null())
        .stderr(stderr)
        .status();

    let rc = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(err) => {
            tracing::error!(error = %err, "failed to run rsync");
            append_log(
                set.log_file.as_deref(),
                &format!("[{}] failed to run rsync: {err}", set.name),
            );
            return -1;
        }
    };

    replay_captured_stderr(set, stderr_file, rc);
    rc
}

fn replay_captured_stderr(set: &SyncSet, stderr_file: &Path, rc: i32) {
    let Ok(meta) = fs::metadata(stderr_file) else {
        return;
    };
    if meta.len() == 0 {
        return;
    }

    let Ok(file) = File::open(stderr_file) else {
        return;
    };
    for line in BufReader::new(file).lines().map_while(Result::ok) {
        append_log(
            set.log_file.as_deref(),
            &format!("[{}] rsync: {line}", set.name),
        );
    }
    append_log(
        set.log_file.as_deref(),
        &format!("[{}] rsync failed with exit status: {rc}", set.name),
    );
}
