//! Driftsync core library: shared leaf utilities.
//!
//! Everything here is consumed by both the watcher and the supervisor:
//! - [`filter`]: leaf-name exclusion rules
//! - [`fsutil`]: atomic publishing, marker files, bounded recursive delete
//! - [`logfile`]: advisory-locked per-set log appends
//! - [`timefmt`]: the `YYYY-MM-DD HH:MM:SS` timestamp convention
//! - [`config`]: the [`SyncSet`] contract consumed by the supervisor

pub mod config;
pub mod error;
pub mod filter;
pub mod fsutil;
pub mod logfile;
pub mod timefmt;

pub use config::SyncSet;
pub use error::CoreError;
pub use filter::PathFilter;
