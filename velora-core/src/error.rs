//! Error types for datagram decoding

use thiserror::Error;

/// Errors that classify why a datagram could not be decoded as a radar reading
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Datagram is too short to contain required data
    #[error("Datagram too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Framing bytes don't match the expected format
    #[error("Invalid framing: expected {expected:02X?}, got {actual:02X?}")]
    InvalidFraming { expected: Vec<u8>, actual: Vec<u8> },

    /// Datagram looked like JSON but did not deserialize as a reading
    #[error("JSON reading rejected: {0}")]
    BadJson(String),

    /// Datagram was text but did not match the delimited reading format
    #[error("Text reading rejected: {0}")]
    BadText(String),

    /// Failed to deserialize a framed structure
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Datagram is not valid UTF-8 and not a binary frame
    #[error("Invalid string encoding")]
    InvalidString,

    /// A time field could not be interpreted
    #[error("Invalid time field: {0}")]
    InvalidTime(String),

    /// No wire format recognized this datagram
    #[error("Unrecognized datagram of {0} bytes")]
    Unrecognized(usize),
}

impl From<bincode::Error> for DecodeError {
    fn from(e: bincode::Error) -> Self {
        DecodeError::DeserializationFailed(e.to_string())
    }
}
