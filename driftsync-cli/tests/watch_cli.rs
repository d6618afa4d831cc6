//! End-to-end runs of `driftsync watch` as a real child process.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn driftsync_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_driftsync"))
}

struct WatcherProcess {
    child: Child,
}

impl WatcherProcess {
    fn start(root: &Path, out: &Path) -> Self {
        let child = Command::new(driftsync_bin())
            .args(["watch", "--dump-interval", "1", "--queue-run-interval", "1"])
            .arg(root)
            .arg(out)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn watcher");
        Self { child }
    }

    fn terminate(&mut self) -> bool {
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM);
        }
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return true;
            }
            sleep(Duration::from_millis(50));
        }
        false
    }
}

impl Drop for WatcherProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn published_lines(out: &Path) -> BTreeSet<String> {
    let mut lines = BTreeSet::new();
    let Ok(entries) = fs::read_dir(out) else {
        return lines;
    };
    for entry in entries.flatten() {
        if let Ok(contents) = fs::read_to_string(entry.path()) {
            lines.extend(contents.lines().map(str::to_owned));
        }
    }
    lines
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn watch_publishes_changes_and_exits_on_sigterm() {
    let root = TempDir::new().expect("root");
    let out = TempDir::new().expect("out");
    let mut watcher = WatcherProcess::start(root.path(), out.path());

    // Give the process time to install its watches.
    sleep(Duration::from_millis(800));
    fs::write(root.path().join("a.txt"), "hello").expect("write");

    assert!(
        wait_until(Duration::from_secs(10), || {
            published_lines(out.path()).contains("a.txt")
        }),
        "expected a batch containing a.txt, saw {:?}",
        published_lines(out.path())
    );

    // Batch file names follow YYYYMMDD-HHMMSS.<pid>.
    let pid_suffix = format!(".{}", watcher.child.id());
    let named_ok = fs::read_dir(out.path())
        .expect("read out dir")
        .flatten()
        .all(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.len() == 15 + pid_suffix.len() && name.ends_with(&pid_suffix)
        });
    assert!(named_ok, "batch files must be named after timestamp and pid");

    assert!(
        watcher.terminate(),
        "watcher should exit promptly on SIGTERM"
    );
}

#[test]
fn watch_refuses_a_missing_root() {
    let out = TempDir::new().expect("out");
    let status = Command::new(driftsync_bin())
        .arg("watch")
        .arg("/definitely/not/here")
        .arg(out.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("run watcher");
    assert!(!status.success(), "missing root must be a fatal error");
}
