//! Image intake normalization
//!
//! The file-delivery side (FTP drop folder, filesystem watcher) only tells
//! us "a file became available at path P". Camera firmware embeds the
//! capture moment in the filename as a `YYYYMMDDHHMMSS` run of digits
//! (`cam03_20240504140845_front.jpg`); when no such run parses as a valid
//! datetime, the caller-supplied fallback (usually the file's modification
//! time) is used instead.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::event::ImageEvent;

static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{14})").expect("timestamp regex is valid"));

/// Extract an embedded capture timestamp from a filename, if present
pub fn capture_timestamp(filename: &str) -> Option<DateTime<Utc>> {
    for captures in TIMESTAMP_RE.captures_iter(filename) {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&captures[1], "%Y%m%d%H%M%S") {
            return Some(naive.and_utc());
        }
    }
    None
}

impl ImageEvent {
    /// Normalize a file-arrival notification into an image event.
    ///
    /// `fallback` is used as the capture timestamp when the filename does
    /// not embed one.
    pub fn from_notification(path: PathBuf, fallback: DateTime<Utc>) -> ImageEvent {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let captured_at = capture_timestamp(&filename).unwrap_or(fallback);
        ImageEvent {
            path,
            captured_at,
            filename,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_capture_timestamp_from_filename() {
        assert_eq!(
            capture_timestamp("cam03_20240504140845_front.jpg"),
            Some(Utc.with_ymd_and_hms(2024, 5, 4, 14, 8, 45).unwrap())
        );
        assert_eq!(
            capture_timestamp("20240504140845.jpg"),
            Some(Utc.with_ymd_and_hms(2024, 5, 4, 14, 8, 45).unwrap())
        );
    }

    #[test]
    fn test_invalid_digit_runs_are_skipped() {
        // 14 digits that are not a datetime (month 99)
        assert_eq!(capture_timestamp("cam_20249999999999.jpg"), None);
        assert_eq!(capture_timestamp("evidence.jpg"), None);
        assert_eq!(capture_timestamp("cam_1234.jpg"), None);
    }

    #[test]
    fn test_from_notification_falls_back_to_mtime() {
        let mtime = Utc.with_ymd_and_hms(2024, 5, 4, 15, 0, 0).unwrap();

        let ev = ImageEvent::from_notification(PathBuf::from("/drop/evidence.jpg"), mtime);
        assert_eq!(ev.captured_at, mtime);
        assert_eq!(ev.filename, "evidence.jpg");

        let ev =
            ImageEvent::from_notification(PathBuf::from("/drop/cam_20240504140845.jpg"), mtime);
        assert_eq!(
            ev.captured_at,
            Utc.with_ymd_and_hms(2024, 5, 4, 14, 8, 45).unwrap()
        );
    }
}
