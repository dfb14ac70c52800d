//! # Velora Core
//!
//! Platform-independent protocol and correlation library for roadside
//! speed-enforcement systems.
//!
//! This crate contains pure decoding and domain logic with **zero I/O
//! dependencies**: every function is a total mapping from bytes and an
//! injected clock to values, and every stateful component is an owned
//! struct mutated by exactly one caller.
//!
//! ## Architecture
//!
//! `velora-core` is the foundation under `velora-server`, the tokio binary
//! that owns sockets, feeds and persistence:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  velora-core (platform-independent, no tokio/async deps)     │
//! │  ├── protocol/     (binary / JSON / text datagram decoding)  │
//! │  ├── event         (RadarEvent, ImageEvent, Fine, ...)       │
//! │  ├── correlation   (nearest-in-time matching, expiry)        │
//! │  ├── dedup         (replay fingerprints)                     │
//! │  ├── fine          (canonical tier table)                    │
//! │  └── image         (capture-timestamp extraction)            │
//! └──────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  velora-server          │
//!                 │  (UDP, intake, storage) │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Wire formats
//!
//! | Format | Shape                                   | Timestamp source |
//! |--------|-----------------------------------------|------------------|
//! | Binary | 8-byte frame `FE AF .. EF`              | decode time      |
//! | JSON   | one object per datagram, alias-tolerant | embedded or decode time |
//! | Text   | `ID: n,Speed: n, Time: HH:MM:SS`        | wall clock + decode date |
//!
//! ## Key Modules
//!
//! - [`protocol`] - wire decoding; [`protocol::decode`] is total
//! - [`correlation`] - pairs violations with evidence images in a window
//! - [`dedup`] - replay detection over stable fingerprints
//! - [`fine`] - the single canonical excess→amount table
//!
//! ## Example: Decoding a Datagram
//!
//! ```rust
//! use velora_core::protocol::{decode, DecodeContext, Decoded};
//! use chrono::Utc;
//!
//! let ctx = DecodeContext { now: Utc::now(), default_limit: 60 };
//! if let Decoded::Radar(reading) = decode(b"ID: 3,Speed: 72, Time: 14:08:45.", &ctx) {
//!     assert_eq!(reading.radar_id, 3);
//!     assert!(reading.is_violation());
//! }
//! ```

pub mod correlation;
pub mod dedup;
pub mod error;
pub mod event;
pub mod fine;
pub mod image;
pub mod protocol;

// Re-export commonly used types
pub use correlation::{CorrelationConfig, CorrelationEngine, QueueDepths, SweepOutcome};
pub use dedup::{DedupStore, Fingerprint};
pub use error::DecodeError;
pub use event::{
    CorrelatedViolation, Fine, FineStatus, ImageEvent, PlateRead, RadarEvent, RadarUnit,
    SourceFormat, UnknownEvent, UNKNOWN_PLATE,
};
pub use fine::{FineBand, FineSchedule, FineScheduleSpec, ScheduleError};
pub use protocol::{decode, DecodeContext, Decoded};
