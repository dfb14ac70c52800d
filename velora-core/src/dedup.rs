//! Replay detection for the UDP feed
//!
//! UDP gives no guarantee the sender won't transmit the same reading twice,
//! and a restarted listener must not double-bill a physical event. Every
//! decoded reading is reduced to a stable [`Fingerprint`] and checked against
//! this store before it is persisted or correlated.
//!
//! The store is time-indexed: fingerprints older than the retention period
//! are dropped by [`DedupStore::purge`], which the owning task calls from its
//! periodic sweep so memory stays bounded.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Stable identity of a physical event, used to detect replays
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// A plain speed reading
    Reading { radar_id: u32, speed: u16, ts_secs: i64 },
    /// A fine-shaped message that already carries a plate
    Plate {
        plate: String,
        radar_id: u32,
        ts_secs: i64,
    },
}

/// Bounded set of recently seen fingerprints
pub struct DedupStore {
    seen: HashMap<Fingerprint, DateTime<Utc>>,
    retention: Duration,
}

impl DedupStore {
    /// Default retention for remembered fingerprints
    pub const DEFAULT_RETENTION_HOURS: i64 = 24;

    pub fn new() -> Self {
        Self::with_retention(Duration::hours(Self::DEFAULT_RETENTION_HOURS))
    }

    pub fn with_retention(retention: Duration) -> Self {
        DedupStore {
            seen: HashMap::new(),
            retention,
        }
    }

    /// Whether this fingerprint was already observed
    pub fn seen(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains_key(fingerprint)
    }

    /// Record a fingerprint at the given observation time
    pub fn remember(&mut self, fingerprint: Fingerprint, now: DateTime<Utc>) {
        self.seen.insert(fingerprint, now);
    }

    /// Check and record in one step.
    ///
    /// Returns true if the fingerprint is new (caller should process the
    /// event), false if it is a replay.
    pub fn check_and_remember(&mut self, fingerprint: Fingerprint, now: DateTime<Utc>) -> bool {
        if self.seen.contains_key(&fingerprint) {
            return false;
        }
        self.seen.insert(fingerprint, now);
        true
    }

    /// Drop fingerprints older than the retention period.
    ///
    /// Returns how many entries were removed.
    pub fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let before = self.seen.len();
        self.seen.retain(|_, at| *at >= cutoff);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fp(speed: u16) -> Fingerprint {
        Fingerprint::Reading {
            radar_id: 1,
            speed,
            ts_secs: 1_700_000_000,
        }
    }

    #[test]
    fn test_check_and_remember() {
        let mut store = DedupStore::new();
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap();

        assert!(store.check_and_remember(fp(66), now));
        assert!(!store.check_and_remember(fp(66), now));
        assert!(store.seen(&fp(66)));
        assert!(!store.seen(&fp(67)));
    }

    #[test]
    fn test_plate_and_reading_fingerprints_are_distinct() {
        let mut store = DedupStore::new();
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap();

        let plate = Fingerprint::Plate {
            plate: "AB12CDE".to_string(),
            radar_id: 1,
            ts_secs: 1_700_000_000,
        };
        assert!(store.check_and_remember(fp(66), now));
        assert!(store.check_and_remember(plate.clone(), now));
        assert!(!store.check_and_remember(plate, now));
    }

    #[test]
    fn test_purge_drops_old_entries() {
        let mut store = DedupStore::new();
        let start = Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap();

        store.remember(fp(60), start);
        store.remember(fp(70), start + Duration::hours(23));
        assert_eq!(store.len(), 2);

        // 25 hours after the first entry: only the first is past retention
        let removed = store.purge(start + Duration::hours(25));
        assert_eq!(removed, 1);
        assert!(!store.seen(&fp(60)));
        assert!(store.seen(&fp(70)));
    }
}
