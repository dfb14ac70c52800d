//! Wire protocol implementations for roadside radar units
//!
//! This module contains pure decoding for each wire format in service.
//! All functions are total over arbitrary byte input - a datagram that no
//! format recognizes becomes an [`UnknownEvent`], never an error that could
//! stop a listener.
//!
//! # Structure
//!
//! - [`binary`] - 8-byte framed readings from first-generation units
//! - [`json`] - JSON object readings, with field-name aliases
//! - [`text`] - delimited-text readings with bare wall-clock times
//!
//! Formats are tried in that fixed order; binary frames are cheap to
//! recognize by length and framing bytes, and only non-JSON input ever
//! reaches the text matcher.
//!
//! # Example
//!
//! ```rust
//! use velora_core::protocol::{decode, DecodeContext, Decoded};
//! use chrono::Utc;
//!
//! let ctx = DecodeContext { now: Utc::now(), default_limit: 60 };
//! match decode(b"ID: 3,Speed: 72, Time: 14:08:45.", &ctx) {
//!     Decoded::Radar(reading) => println!("radar {} at {} km/h", reading.radar_id, reading.speed),
//!     Decoded::Unknown(unknown) => println!("undecodable: {}", unknown.reason),
//! }
//! ```

pub mod binary;
pub mod json;
pub mod text;

use chrono::{DateTime, Utc};

use crate::error::DecodeError;
use crate::event::{RadarEvent, SourceFormat, UnknownEvent};

/// Ambient facts the decoder needs but must not reach for itself.
///
/// The clock is injected so decoding stays a pure function of its inputs.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    /// Decode time, used for formats that carry no (full) timestamp
    pub now: DateTime<Utc>,
    /// Posted limit assumed for formats that don't report one
    pub default_limit: u16,
}

/// Outcome of decoding one datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Radar(RadarEvent),
    Unknown(UnknownEvent),
}

/// Decode a single datagram into a normalized reading.
///
/// Total: any input produces either a [`RadarEvent`] or an [`UnknownEvent`]
/// carrying the reason the best-matching format rejected it.
pub fn decode(data: &[u8], ctx: &DecodeContext) -> Decoded {
    if binary::looks_like_frame(data) {
        return match binary::parse_frame(data) {
            Ok(reading) => Decoded::Radar(RadarEvent {
                radar_id: reading.radar_id,
                speed: reading.speed,
                speed_limit: reading.speed_limit,
                timestamp: ctx.now,
                source: SourceFormat::Binary,
                plate: None,
                checksum_ok: reading.checksum_ok,
                raw: data.to_vec(),
            }),
            Err(reason) => unknown(reason, data),
        };
    }

    if json::looks_like_json(data) {
        return match json::parse_reading(data, ctx.now) {
            Ok(reading) => Decoded::Radar(RadarEvent {
                radar_id: reading.radar_id,
                speed: reading.speed,
                speed_limit: reading.speed_limit.unwrap_or(ctx.default_limit),
                timestamp: reading.timestamp,
                source: SourceFormat::Json,
                plate: reading.plate,
                checksum_ok: true,
                raw: data.to_vec(),
            }),
            Err(reason) => unknown(reason, data),
        };
    }

    match text::parse_reading(data, ctx.now) {
        Ok(reading) => Decoded::Radar(RadarEvent {
            radar_id: reading.radar_id,
            speed: reading.speed,
            speed_limit: ctx.default_limit,
            timestamp: reading.timestamp,
            source: SourceFormat::Text,
            plate: None,
            checksum_ok: true,
            raw: data.to_vec(),
        }),
        Err(DecodeError::BadText(_)) => unknown(DecodeError::Unrecognized(data.len()), data),
        Err(reason) => unknown(reason, data),
    }
}

fn unknown(reason: DecodeError, data: &[u8]) -> Decoded {
    Decoded::Unknown(UnknownEvent {
        reason,
        raw: data.to_vec(),
    })
}
