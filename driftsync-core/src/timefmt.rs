//! Timestamp formatting shared by the log writer and the status file.

use std::time::SystemTime;

use chrono::{DateTime, Local};

/// Format a wall-clock time as local `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(time: SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format an optional wall-clock time, using `-` for "never".
pub fn format_timestamp_or_dash(time: Option<SystemTime>) -> String {
    match time {
        Some(time) => format_timestamp(time),
        None => "-".to_owned(),
    }
}

/// Local `YYYYMMDD-HHMMSS` stamp used in published batch-file names.
pub fn compact_stamp(time: SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn formats_are_shaped_as_expected() {
        let time = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let long = format_timestamp(time);
        assert_eq!(long.len(), 19);
        assert_eq!(&long[4..5], "-");
        assert_eq!(&long[10..11], " ");

        let compact = compact_stamp(time);
        assert_eq!(compact.len(), 15);
        assert_eq!(&compact[8..9], "-");
        assert!(compact.chars().filter(|c| *c == '-').count() == 1);
    }

    #[test]
    fn missing_time_renders_as_dash() {
        assert_eq!(format_timestamp_or_dash(None), "-");
        let time = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_ne!(format_timestamp_or_dash(Some(time)), "-");
    }
}
