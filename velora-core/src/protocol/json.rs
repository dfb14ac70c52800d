//! JSON radar datagram parsing
//!
//! Newer units report readings as a single JSON object per datagram. Field
//! names drifted across firmware versions between camelCase and snake_case,
//! and some fleets send `licensePlate` where others send `plateNumber`;
//! serde aliases accept all observed spellings.
//!
//! A datagram that carries a plate is a "fine-shaped" message: the sending
//! unit ran its own recognition and the plate travels with the reading.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::DecodeError;

/// JSON reading as found on the wire
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct WireReading {
    #[serde(alias = "radar_id")]
    radar_id: u32,

    speed: u16,

    #[serde(default, alias = "speed_limit")]
    speed_limit: Option<u16>,

    /// Missing timestamps default to decode time
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,

    #[serde(
        default,
        alias = "plate_number",
        alias = "plateNumber",
        alias = "licensePlate",
        alias = "license_plate"
    )]
    plate: Option<String>,
}

/// A decoded JSON reading
#[derive(Debug, Clone, PartialEq)]
pub struct JsonReading {
    pub radar_id: u32,
    pub speed: u16,
    /// None when the unit did not report a posted limit
    pub speed_limit: Option<u16>,
    pub timestamp: DateTime<Utc>,
    pub plate: Option<String>,
}

/// Quick check whether a datagram could be a JSON object
pub fn looks_like_json(data: &[u8]) -> bool {
    data.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

/// Parse a JSON datagram into a reading
pub fn parse_reading(data: &[u8], now: DateTime<Utc>) -> Result<JsonReading, DecodeError> {
    let wire: WireReading =
        serde_json::from_slice(data).map_err(|e| DecodeError::BadJson(e.to_string()))?;

    Ok(JsonReading {
        radar_id: wire.radar_id,
        speed: wire.speed,
        speed_limit: wire.speed_limit,
        timestamp: wire.timestamp.unwrap_or(now),
        plate: wire.plate.filter(|p| !p.is_empty()),
    })
}
