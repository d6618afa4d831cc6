//! Collation of watcher batches into one transfer list.
//!
//! The watcher intentionally over-reports: a path may be marked changed and
//! then deleted before the transfer runs. Collation makes the final list
//! concrete and minimal: duplicates across batch files are stripped and
//! only paths that still exist under the source survive.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{io_err, SupervisorError};

/// Drain every batch file in `change_queue` into `transfer_list`,
/// deleting each batch file after it has been ingested.
///
/// Dotfiles are reserved for producer scratch and skipped. Individual
/// unreadable batch files are removed and skipped; only a failure to open
/// the transfer list itself aborts the collation.
pub(crate) fn collate_transfer_list(
    source: &Path,
    change_queue: &Path,
    transfer_list: &Path,
) -> Result<(), SupervisorError> {
    let mut list = OpenOptions::new()
        .append(true)
        .create(true)
        .open(transfer_list)
        .map_err(|e| io_err(transfer_list, e))?;

    let mut names = match fs::read_dir(change_queue) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>(),
        Err(err) => {
            tracing::error!(path = %change_queue.display(), error = %err, "cannot list change queue");
            return Ok(());
        }
    };
    names.sort();

    let mut emitted = BTreeSet::new();
    for name in names {
        if name.starts_with('.') {
            continue;
        }
        let path = change_queue.join(&name);
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "unreadable batch file");
                let _ = fs::remove_file(&path);
                continue;
            }
        };

        for line in BufReader::new(file).lines().map_while(Result::ok) {
            if line.is_empty() {
                continue;
            }
            if !emitted.insert(line.clone()) {
                tracing::debug!(line, "skipping duplicate change line");
                continue;
            }
            // The root marker `/` must resolve to the source itself, not
            // replace it the way joining an absolute path would.
            let full = source.join(line.trim_start_matches('/'));
            if fs::symlink_metadata(&full).is_ok() {
                if let Err(err) = writeln!(list, "{line}") {
                    return Err(io_err(transfer_list, err));
                }
            }
        }

        let _ = fs::remove_file(&path);
    }

    Ok(())
}
