//! Time-windowed correlation of violations and evidence images
//!
//! The radar units and the camera pipeline are physically separate
//! subsystems with no shared clock beyond "within tens of seconds", and
//! either feed can fail independently. This engine reconciles them:
//!
//! ```text
//! violations ──►┌────────────────────────┐
//!               │   CorrelationEngine    │──► CorrelatedViolation (matched)
//! images ──────►│  pending queues +      │──► CorrelatedViolation (expired,
//!               │  nearest-in-time match │        unmatched, no images)
//! sweep tick ──►└────────────────────────┘
//! ```
//!
//! Per pending entry the lifecycle is `Enqueued → Matched | Expired`.
//! Every violation produces exactly one [`CorrelatedViolation`] - matched
//! when an image lands inside the correlation window, unmatched when the
//! expiry sweep gives up on it (camera fault, dropped file). Images that
//! expire unmatched are simply discarded; no fine is owed for a photo alone.
//!
//! The engine owns all of its state and injects no clock: callers pass
//! `now` into every mutating operation. Whoever owns the engine (a single
//! task in the server) is the single mutation point, so matching can never
//! race the sweep.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::event::{CorrelatedViolation, ImageEvent, RadarEvent};

/// Tuning for the correlation engine
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Maximum |violation time - capture time| for a match
    pub window: Duration,
    /// Pending entries expire after `window * expiry_multiplier`
    pub expiry_multiplier: i32,
    /// Ceiling on total pending entries across both queues
    pub max_pending: usize,
    /// Maximum evidence images attached to one violation
    pub max_images: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig {
            window: Duration::seconds(30),
            expiry_multiplier: 2,
            max_pending: 1024,
            max_images: 3,
        }
    }
}

/// A violation waiting for evidence images
#[derive(Debug, Clone)]
pub struct PendingViolation {
    pub event: RadarEvent,
    pub enqueued_at: DateTime<Utc>,
}

/// An image waiting for a violation
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub event: ImageEvent,
    pub enqueued_at: DateTime<Utc>,
}

/// Pending queue depths, exposed for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepths {
    pub violations: usize,
    pub images: usize,
}

/// Result of one expiry sweep
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Violations that gave up waiting, emitted unmatched
    pub expired: Vec<CorrelatedViolation>,
    /// Images dropped without ever matching
    pub images_dropped: usize,
}

/// Stateful nearest-in-time matcher; see module docs
pub struct CorrelationEngine {
    config: CorrelationConfig,
    violations: VecDeque<PendingViolation>,
    images: VecDeque<PendingImage>,
    seq: u64,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        CorrelationEngine {
            config,
            violations: VecDeque::new(),
            images: VecDeque::new(),
            seq: 0,
        }
    }

    /// Feed a new violation into the engine.
    ///
    /// Emits at most one matched violation for the event itself, plus any
    /// unmatched violations evicted to keep the pending ceiling.
    pub fn on_violation(
        &mut self,
        event: RadarEvent,
        now: DateTime<Utc>,
    ) -> Vec<CorrelatedViolation> {
        let mut emitted = Vec::new();

        let images = self.take_images_near(event.timestamp, self.config.max_images);
        if !images.is_empty() {
            emitted.push(self.emit(event, images, true));
            return emitted;
        }

        self.violations.push_back(PendingViolation {
            event,
            enqueued_at: now,
        });
        self.enforce_ceiling(&mut emitted);
        emitted
    }

    /// Feed a new image into the engine; symmetric to [`Self::on_violation`].
    pub fn on_image(&mut self, event: ImageEvent, now: DateTime<Utc>) -> Vec<CorrelatedViolation> {
        let mut emitted = Vec::new();

        if let Some(index) = self.closest_violation(event.captured_at) {
            let violation = self.violations.remove(index).expect("index is in bounds");
            // The incoming image plus any other pending captures of the
            // same physical event, nearest first
            let mut images = self.take_images_near(
                violation.event.timestamp,
                self.config.max_images.saturating_sub(1),
            );
            images.push(event);
            images.sort_by_key(|img| {
                (img.captured_at - violation.event.timestamp)
                    .num_milliseconds()
                    .abs()
            });
            emitted.push(self.emit(violation.event, images, true));
            return emitted;
        }

        self.images.push_back(PendingImage {
            event,
            enqueued_at: now,
        });
        self.enforce_ceiling(&mut emitted);
        emitted
    }

    /// Resolve pending entries that outlived the expiry window.
    ///
    /// Expired violations are emitted unmatched so a fine is still created;
    /// expired images are counted and dropped.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepOutcome {
        let deadline = self.config.window * self.config.expiry_multiplier;
        let mut outcome = SweepOutcome::default();

        while let Some(front) = self.violations.front() {
            if now - front.enqueued_at <= deadline {
                break;
            }
            let pending = self.violations.pop_front().expect("front exists");
            let expired = self.emit(pending.event, Vec::new(), false);
            outcome.expired.push(expired);
        }

        while let Some(front) = self.images.front() {
            if now - front.enqueued_at <= deadline {
                break;
            }
            self.images.pop_front();
            outcome.images_dropped += 1;
        }

        outcome
    }

    /// Drain every pending violation as unmatched and drop pending images.
    ///
    /// Called once at shutdown so enqueued work is never silently lost.
    pub fn flush(&mut self) -> Vec<CorrelatedViolation> {
        self.images.clear();
        let pending: Vec<_> = self.violations.drain(..).collect();
        pending
            .into_iter()
            .map(|p| self.emit(p.event, Vec::new(), false))
            .collect()
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            violations: self.violations.len(),
            images: self.images.len(),
        }
    }

    /// Remove and return up to `cap` pending images within the window of
    /// `at`, nearest first
    fn take_images_near(&mut self, at: DateTime<Utc>, cap: usize) -> Vec<ImageEvent> {
        let mut candidates: Vec<(i64, usize)> = self
            .images
            .iter()
            .enumerate()
            .filter_map(|(index, pending)| {
                let diff = (pending.event.captured_at - at).num_milliseconds().abs();
                (diff <= self.config.window.num_milliseconds()).then_some((diff, index))
            })
            .collect();
        // Stable sort: equal distances keep queue (enqueue) order
        candidates.sort_by_key(|(diff, _)| *diff);
        candidates.truncate(cap);

        // Remove back-to-front so earlier indices stay valid
        let mut indices: Vec<usize> = candidates.iter().map(|(_, index)| *index).collect();
        indices.sort_unstable();
        let mut picked: Vec<ImageEvent> = Vec::with_capacity(indices.len());
        for index in indices.into_iter().rev() {
            let pending = self.images.remove(index).expect("index is in bounds");
            picked.push(pending.event);
        }
        // Back into nearest-first order
        picked.sort_by_key(|img| (img.captured_at - at).num_milliseconds().abs());
        picked
    }

    /// Index of the pending violation closest in time to `at`, within the
    /// window. Ties resolve to the earliest-enqueued entry.
    fn closest_violation(&self, at: DateTime<Utc>) -> Option<usize> {
        let mut best: Option<(i64, usize)> = None;
        for (index, pending) in self.violations.iter().enumerate() {
            let diff = (pending.event.timestamp - at).num_milliseconds().abs();
            if diff > self.config.window.num_milliseconds() {
                continue;
            }
            // Strict < keeps the earliest-enqueued entry on equal distance
            if best.map_or(true, |(best_diff, _)| diff < best_diff) {
                best = Some((diff, index));
            }
        }
        best.map(|(_, index)| index)
    }

    fn enforce_ceiling(&mut self, emitted: &mut Vec<CorrelatedViolation>) {
        while self.violations.len() + self.images.len() > self.config.max_pending {
            // Evict whichever queue front has waited longest
            let evict_violation = match (self.violations.front(), self.images.front()) {
                (Some(v), Some(i)) => v.enqueued_at <= i.enqueued_at,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => return,
            };
            if evict_violation {
                let pending = self.violations.pop_front().expect("front exists");
                let expired = self.emit(pending.event, Vec::new(), false);
                emitted.push(expired);
            } else {
                self.images.pop_front();
            }
        }
    }

    fn emit(
        &mut self,
        event: RadarEvent,
        images: Vec<ImageEvent>,
        matched: bool,
    ) -> CorrelatedViolation {
        self.seq += 1;
        let correlation_id = format!(
            "{}-{}-{}",
            event.radar_id,
            event.timestamp.timestamp_millis(),
            self.seq
        );
        CorrelatedViolation {
            correlation_id,
            radar_event: event,
            images,
            matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SourceFormat;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        base() + Duration::seconds(secs)
    }

    fn violation(ts_secs: i64) -> RadarEvent {
        RadarEvent {
            radar_id: 1,
            speed: 82,
            speed_limit: 60,
            timestamp: at(ts_secs),
            source: SourceFormat::Json,
            plate: None,
            checksum_ok: true,
            raw: vec![],
        }
    }

    fn image(name: &str, ts_secs: i64) -> ImageEvent {
        ImageEvent {
            path: PathBuf::from(format!("/drop/{name}")),
            captured_at: at(ts_secs),
            filename: name.to_string(),
        }
    }

    fn engine() -> CorrelationEngine {
        CorrelationEngine::new(CorrelationConfig::default())
    }

    #[test]
    fn test_image_then_violation_matches() {
        let mut engine = engine();

        assert!(engine.on_image(image("a.jpg", 115), at(115)).is_empty());
        let emitted = engine.on_violation(violation(100), at(116));

        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].matched);
        assert_eq!(emitted[0].images.len(), 1);
        assert_eq!(emitted[0].images[0].filename, "a.jpg");
        assert_eq!(engine.depths(), QueueDepths { violations: 0, images: 0 });
    }

    #[test]
    fn test_violation_then_image_matches() {
        let mut engine = engine();

        assert!(engine.on_violation(violation(100), at(100)).is_empty());
        let emitted = engine.on_image(image("a.jpg", 115), at(115));

        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].matched);
        assert_eq!(emitted[0].radar_event.timestamp, at(100));
        assert_eq!(engine.depths(), QueueDepths { violations: 0, images: 0 });
    }

    #[test]
    fn test_outside_window_does_not_match() {
        let mut engine = engine();

        assert!(engine.on_violation(violation(100), at(100)).is_empty());
        // 100 seconds apart, window is 30
        assert!(engine.on_image(image("late.jpg", 200), at(200)).is_empty());
        assert_eq!(engine.depths(), QueueDepths { violations: 1, images: 1 });
    }

    #[test]
    fn test_expired_violation_emits_unmatched_and_image_stays_eligible() {
        let mut engine = engine();

        engine.on_violation(violation(100), at(100));
        engine.on_image(image("late.jpg", 200), at(200));

        // Expiry deadline is 60s; at t=201 the violation enqueued at t=100
        // is overdue, the image enqueued at t=200 is not
        let outcome = engine.sweep(at(200) + Duration::seconds(1));
        assert_eq!(outcome.expired.len(), 1);
        assert!(!outcome.expired[0].matched);
        assert!(outcome.expired[0].images.is_empty());
        assert_eq!(outcome.images_dropped, 0);

        // The leftover image can still match a violation near its capture time
        let emitted = engine.on_violation(violation(195), at(202));
        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].matched);
        assert_eq!(emitted[0].images[0].filename, "late.jpg");
    }

    #[test]
    fn test_expired_images_are_dropped_silently() {
        let mut engine = engine();

        engine.on_image(image("a.jpg", 100), at(100));
        engine.on_image(image("b.jpg", 105), at(105));

        let outcome = engine.sweep(at(170));
        assert!(outcome.expired.is_empty());
        assert_eq!(outcome.images_dropped, 2);
        assert_eq!(engine.depths(), QueueDepths { violations: 0, images: 0 });
    }

    #[test]
    fn test_nearest_image_wins() {
        let mut engine = engine();

        engine.on_image(image("far.jpg", 125), at(125));
        engine.on_image(image("near.jpg", 103), at(126));

        let emitted = engine.on_violation(violation(100), at(127));
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].images[0].filename, "near.jpg");
    }

    #[test]
    fn test_equal_distance_prefers_earliest_enqueued() {
        let mut engine = engine();

        // Both violations are 10s from the image capture time
        engine.on_violation(violation(110), at(110));
        engine.on_violation(violation(130), at(130));

        let emitted = engine.on_image(image("a.jpg", 120), at(131));
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].radar_event.timestamp, at(110));
        assert_eq!(engine.depths().violations, 1);
    }

    #[test]
    fn test_multi_photo_evidence_capped() {
        let mut engine = CorrelationEngine::new(CorrelationConfig {
            max_images: 2,
            ..CorrelationConfig::default()
        });

        engine.on_image(image("a.jpg", 101), at(101));
        engine.on_image(image("b.jpg", 104), at(104));
        engine.on_image(image("c.jpg", 108), at(108));

        let emitted = engine.on_violation(violation(100), at(110));
        assert_eq!(emitted.len(), 1);
        let names: Vec<_> = emitted[0].images.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
        // The unpicked image stays pending
        assert_eq!(engine.depths().images, 1);
    }

    #[test]
    fn test_ceiling_evicts_oldest_as_unmatched() {
        let mut engine = CorrelationEngine::new(CorrelationConfig {
            max_pending: 3,
            ..CorrelationConfig::default()
        });

        // One-sided flood: violations with no images ever arriving,
        // spaced outside the window so nothing matches
        let mut evicted = Vec::new();
        for i in 0..10 {
            let secs = i * 100;
            evicted.extend(engine.on_violation(violation(secs), at(secs)));
        }

        assert_eq!(engine.depths().violations, 3);
        assert_eq!(evicted.len(), 7);
        assert!(evicted.iter().all(|v| !v.matched));
        // Oldest first
        assert_eq!(evicted[0].radar_event.timestamp, at(0));
    }

    #[test]
    fn test_flush_drains_violations_as_unmatched() {
        let mut engine = engine();

        engine.on_violation(violation(100), at(100));
        engine.on_violation(violation(200), at(200));
        engine.on_image(image("a.jpg", 300), at(300));

        let flushed = engine.flush();
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().all(|v| !v.matched));
        assert_eq!(engine.depths(), QueueDepths { violations: 0, images: 0 });
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let mut engine = engine();

        let mut ids = Vec::new();
        for i in 0..5 {
            engine.on_violation(violation(i * 1000), at(i * 1000));
        }
        for v in engine.flush() {
            ids.push(v.correlation_id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }
}
