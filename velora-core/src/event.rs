//! Domain event model
//!
//! All types here are immutable once constructed: a decoded reading is never
//! mutated, a correlated violation is built exactly once and handed off.
//! State transitions on persisted fines (paid, cancelled) belong to the
//! business layer, not this crate.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::Fingerprint;
use crate::error::DecodeError;

/// Plate string used when no recognition result is available
pub const UNKNOWN_PLATE: &str = "UNKNOWN";

/// Wire format a reading was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Binary,
    Json,
    Text,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Binary => "binary",
            SourceFormat::Json => "json",
            SourceFormat::Text => "text",
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single speed measurement reported by a roadside unit
///
/// Created by the decoder for every valid datagram, persisted once,
/// never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarEvent {
    pub radar_id: u32,
    /// Measured speed in km/h
    pub speed: u16,
    /// Posted limit in km/h
    pub speed_limit: u16,
    pub timestamp: DateTime<Utc>,
    pub source: SourceFormat,
    /// Plate carried on the wire, if the sending unit does its own recognition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
    /// False when the binary frame's checksum byte did not verify.
    /// The reading is still accepted; see the binary protocol module.
    pub checksum_ok: bool,
    /// Original datagram bytes, kept for the audit trail
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl RadarEvent {
    /// Whether this reading exceeds its posted limit
    pub fn is_violation(&self) -> bool {
        self.speed > self.speed_limit
    }

    /// Speed excess in km/h; negative when under the limit
    pub fn excess(&self) -> i32 {
        self.speed as i32 - self.speed_limit as i32
    }

    /// Stable replay-detection fingerprint for this reading.
    ///
    /// Readings that carry a plate (fine-shaped messages) fingerprint on
    /// the plate so a re-sent fine never bills twice even if the reported
    /// speed byte differs between sends.
    pub fn fingerprint(&self) -> Fingerprint {
        match &self.plate {
            Some(plate) => Fingerprint::Plate {
                plate: plate.clone(),
                radar_id: self.radar_id,
                ts_secs: self.timestamp.timestamp(),
            },
            None => Fingerprint::Reading {
                radar_id: self.radar_id,
                speed: self.speed,
                ts_secs: self.timestamp.timestamp(),
            },
        }
    }
}

/// A datagram that no wire format recognized
///
/// Surfaced for observability; never stops the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownEvent {
    pub reason: DecodeError,
    pub raw: Vec<u8>,
}

/// A captured photograph that became available on the image feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEvent {
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub filename: String,
}

/// A violation paired with its evidence images, emitted exactly once
/// per physical event
///
/// `matched: false` means the violation expired without any image inside
/// the correlation window; a fine is still owed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedViolation {
    pub correlation_id: String,
    pub radar_event: RadarEvent,
    /// Evidence images, nearest-in-time first. Empty when unmatched.
    pub images: Vec<ImageEvent>,
    pub matched: bool,
}

impl CorrelatedViolation {
    /// Path of the closest evidence image, if any
    pub fn primary_image(&self) -> Option<&ImageEvent> {
        self.images.first()
    }
}

/// Lifecycle status of a fine within this system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FineStatus {
    Pending,
    Processed,
}

impl Default for FineStatus {
    fn default() -> Self {
        FineStatus::Pending
    }
}

/// The persisted monetary outcome of a correlated violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fine {
    /// Recognized plate, or [`UNKNOWN_PLATE`]
    pub plate: String,
    pub speed: u16,
    pub speed_limit: u16,
    /// Monetary amount from the fine schedule
    pub amount: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    pub status: FineStatus,
    pub correlation_id: String,
    pub issued_at: DateTime<Utc>,
}

/// Result of a plate recognition attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateRead {
    pub plate: String,
    /// Recognizer confidence in [0, 1]
    pub confidence: f32,
}

/// A known roadside unit, keyed by its wire id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarUnit {
    pub radar_id: u32,
    pub speed_limit: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading(speed: u16, limit: u16) -> RadarEvent {
        RadarEvent {
            radar_id: 7,
            speed,
            speed_limit: limit,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap(),
            source: SourceFormat::Binary,
            plate: None,
            checksum_ok: true,
            raw: vec![],
        }
    }

    #[test]
    fn test_violation_detection() {
        assert!(reading(66, 50).is_violation());
        assert!(!reading(50, 50).is_violation());
        assert_eq!(reading(66, 50).excess(), 16);
        assert_eq!(reading(40, 50).excess(), -10);
    }

    #[test]
    fn test_fingerprint_prefers_plate() {
        let mut ev = reading(66, 50);
        assert!(matches!(ev.fingerprint(), Fingerprint::Reading { .. }));

        ev.plate = Some("AB12CDE".to_string());
        match ev.fingerprint() {
            Fingerprint::Plate { plate, radar_id, .. } => {
                assert_eq!(plate, "AB12CDE");
                assert_eq!(radar_id, 7);
            }
            other => panic!("unexpected fingerprint {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let json = serde_json::to_value(reading(66, 50)).unwrap();
        assert_eq!(json["radarId"], 7);
        assert_eq!(json["speedLimit"], 50);
        assert_eq!(json["source"], "binary");
        // Raw bytes are audit-only, never part of the API shape
        assert!(json.get("raw").is_none());
    }
}
