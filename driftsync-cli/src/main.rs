//! driftsync: continuously mirror a directory tree with rsync.
//!
//! # Usage
//!
//! ```text
//! driftsync watch [OPTIONS] <DIRECTORY> <OUTPUTDIR>
//! driftsync sync [OPTIONS] --source <DIR> --destination <DEST>
//! ```
//!
//! `watch` runs the change-detection engine on its own, dumping changed
//! paths to uniquely named files in OUTPUTDIR. `sync` runs a full
//! supervisor for one set, spawning `watch` as its child.

mod commands;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{sync::SyncArgs, watch::WatchArgs};

#[derive(Parser, Debug)]
#[command(
    name = "driftsync",
    version,
    about = "Continuously mirror a directory tree to an rsync destination",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a directory for changes, dumping changed paths to unique
    /// files in the output directory every few seconds.
    Watch(WatchArgs),

    /// Supervise one sync set: run the watcher and schedule full and
    /// partial rsync transfers.
    Sync(SyncArgs),
}

/// Map SIGTERM and SIGINT onto a single exit flag checked at loop
/// iteration boundaries; nothing else runs in signal context.
fn register_exit_flag() -> Result<Arc<AtomicBool>> {
    let exit = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, exit.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, exit.clone())?;
    Ok(exit)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();
    driftsync_core::fsutil::ensure_path_env();

    let cli = Cli::parse();
    match cli.command {
        Commands::Watch(args) => args.run(),
        Commands::Sync(args) => args.run(),
    }
}
