//! Binary radar frame parsing
//!
//! The oldest roadside units report readings as a fixed 8-byte frame.
//! No I/O operations - just `&[u8]` → `Result<T>` functions.
//!
//! # Frame layout
//!
//! | Offset | Field | Notes |
//! |--------|----------|----------------------------------|
//! | 0-1 | framing | `FE AF` |
//! | 2 | sequence | per-unit rolling counter |
//! | 3 | radar id | |
//! | 4 | limit | posted limit in km/h |
//! | 5 | speed | measured speed in km/h |
//! | 6 | checksum | XOR of offsets 2..=5 |
//! | 7 | framing | `EF` |
//!
//! The frame carries no timestamp; the reading is stamped with decode time.
//!
//! Deployed units emit more than one checksum variant, so a mismatch does
//! not reject the frame: the reading is accepted with `checksum_ok = false`
//! and the listener counts and logs it.

use serde::Deserialize;

use crate::error::DecodeError;

// =============================================================================
// Constants
// =============================================================================

/// Total frame length in bytes
pub const FRAME_LEN: usize = 8;

/// Start-of-frame bytes
pub const FRAME_SOF: [u8; 2] = [0xFE, 0xAF];

/// End-of-frame byte
pub const FRAME_EOF: u8 = 0xEF;

// =============================================================================
// Frame parsing
// =============================================================================

/// Raw binary frame as found on the wire
///
/// Known layout for parsing, like a packed C struct.
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct RawFrame {
    sof: [u8; 2],
    sequence: u8,
    radar_id: u8,
    limit: u8,
    speed: u8,
    checksum: u8,
    eof: u8,
}

/// A decoded binary reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryReading {
    pub radar_id: u32,
    pub speed: u16,
    pub speed_limit: u16,
    pub sequence: u8,
    /// Whether the checksum byte verified against the payload
    pub checksum_ok: bool,
}

/// Quick check whether a datagram could be a binary frame
pub fn looks_like_frame(data: &[u8]) -> bool {
    data.len() == FRAME_LEN && data[0..2] == FRAME_SOF
}

/// Parse an 8-byte binary frame into a reading
pub fn parse_frame(data: &[u8]) -> Result<BinaryReading, DecodeError> {
    if data.len() < FRAME_LEN {
        return Err(DecodeError::TooShort {
            expected: FRAME_LEN,
            actual: data.len(),
        });
    }
    let frame: RawFrame = bincode::deserialize(data)?;

    if frame.sof != FRAME_SOF || frame.eof != FRAME_EOF {
        return Err(DecodeError::InvalidFraming {
            expected: vec![FRAME_SOF[0], FRAME_SOF[1], FRAME_EOF],
            actual: vec![data[0], data[1], data[7]],
        });
    }

    let checksum_ok = frame.checksum == expected_checksum(data);

    Ok(BinaryReading {
        radar_id: frame.radar_id as u32,
        speed: frame.speed as u16,
        speed_limit: frame.limit as u16,
        sequence: frame.sequence,
        checksum_ok,
    })
}

/// Checksum over the payload bytes (offsets 2..=5)
fn expected_checksum(data: &[u8]) -> u8 {
    data[2..6].iter().fold(0u8, |acc, b| acc ^ b)
}
