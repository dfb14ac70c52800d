//! Delimited-text radar datagram parsing
//!
//! Mid-generation units report readings as a single human-readable line:
//!
//! ```text
//! ID: 3,Speed: 72, Time: 14:08:45.
//! ```
//!
//! The line carries only a wall-clock time, so the full timestamp is built
//! by combining `HH:MM:SS` with the decode-time calendar date. A reading
//! whose combined timestamp lands more than [`MAX_FUTURE_SKEW_SECS`] ahead
//! of decode time is assumed to have been sent just before local midnight
//! and is shifted back one day.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DecodeError;

/// Readings this far in the future belong to the previous day
pub const MAX_FUTURE_SKEW_SECS: i64 = 300;

static READING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"ID:\s*(\d+),\s*Speed:\s*(\d+),\s*Time:\s*(\d{2}:\d{2}:\d{2})")
        .expect("reading regex is valid")
});

/// A decoded text reading
#[derive(Debug, Clone, PartialEq)]
pub struct TextReading {
    pub radar_id: u32,
    pub speed: u16,
    pub timestamp: DateTime<Utc>,
}

/// Parse a delimited-text datagram into a reading
pub fn parse_reading(data: &[u8], now: DateTime<Utc>) -> Result<TextReading, DecodeError> {
    let line = std::str::from_utf8(data).map_err(|_| DecodeError::InvalidString)?;

    let captures = READING_RE
        .captures(line)
        .ok_or_else(|| DecodeError::BadText(format!("no reading in {:?}", line.trim())))?;

    let radar_id: u32 = captures[1]
        .parse()
        .map_err(|_| DecodeError::BadText(format!("radar id {:?}", &captures[1])))?;
    let speed: u16 = captures[2]
        .parse()
        .map_err(|_| DecodeError::BadText(format!("speed {:?}", &captures[2])))?;
    let time = NaiveTime::parse_from_str(&captures[3], "%H:%M:%S")
        .map_err(|_| DecodeError::InvalidTime(captures[3].to_string()))?;

    Ok(TextReading {
        radar_id,
        speed,
        timestamp: resolve_date(time, now),
    })
}

/// Combine a bare wall-clock time with the decode-time date.
///
/// A packet describing 23:59:59 that is decoded just after midnight would
/// otherwise roll onto the wrong day.
fn resolve_date(time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = now.date_naive().and_time(time).and_utc();
    if candidate - now > Duration::seconds(MAX_FUTURE_SKEW_SECS) {
        candidate - Duration::days(1)
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_reference_line() {
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 14, 10, 0).unwrap();
        let reading = parse_reading(b"ID: 3,Speed: 72, Time: 14:08:45.", now).unwrap();
        assert_eq!(reading.radar_id, 3);
        assert_eq!(reading.speed, 72);
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 4, 14, 8, 45).unwrap()
        );
    }

    #[test]
    fn test_whitespace_is_flexible() {
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 14, 10, 0).unwrap();
        let reading = parse_reading(b"ID:7, Speed:101,  Time: 09:00:01", now).unwrap();
        assert_eq!(reading.radar_id, 7);
        assert_eq!(reading.speed, 101);
    }

    #[test]
    fn test_midnight_rollover_maps_to_previous_day() {
        // Decoded at 00:00:05, the 23:59:59 reading belongs to yesterday
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 0, 0, 5).unwrap();
        let reading = parse_reading(b"ID: 3,Speed: 72, Time: 23:59:59", now).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 4, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_small_future_skew_is_kept_on_today() {
        // Two minutes ahead is within clock skew, not a day rollover
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 14, 0, 0).unwrap();
        let reading = parse_reading(b"ID: 3,Speed: 72, Time: 14:02:00", now).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 4, 14, 2, 0).unwrap()
        );
    }

    #[test]
    fn test_rejects_malformed_lines() {
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 14, 0, 0).unwrap();
        assert!(matches!(
            parse_reading(b"Speed: 72", now),
            Err(DecodeError::BadText(_))
        ));
        assert!(matches!(
            parse_reading(b"ID: 3,Speed: 72, Time: 14:08", now),
            Err(DecodeError::BadText(_))
        ));
        assert!(matches!(
            parse_reading(&[0xFF, 0xFE, 0x00], now),
            Err(DecodeError::InvalidString)
        ));
    }
}
