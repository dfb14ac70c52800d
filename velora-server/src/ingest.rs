//! Ingest task - the single mutation point
//!
//! Both producers (UDP listener, image intake) feed one mpsc channel of
//! typed [`IngestMsg`]s consumed by this task, which owns the only mutable
//! state in the core: the correlation engine and the dedup store. The
//! expiry sweep ticks inside the same `select!` loop, so a sweep can never
//! race a match for the same pending entry.
//!
//! Nothing here blocks: storage writes are handed to the reading
//! persister's spawned tasks, and correlated violations go to the
//! recorder over a channel after the state mutation is complete.
//!
//! On shutdown the task drains whatever is already queued, flushes every
//! pending violation as unmatched (so enqueued work is never silently
//! lost), and drops the recorder sender so the recorder can finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tokio_graceful_shutdown::SubsystemHandle;

use velora_core::protocol::Decoded;
use velora_core::{
    CorrelatedViolation, CorrelationEngine, DedupStore, ImageEvent, QueueDepths, RadarEvent,
};

use crate::error::ServerError;
use crate::events::{publish, DomainEvent, EventBus};
use crate::persist::ReadingPersister;

/// Typed messages from the two feeds
#[derive(Debug)]
pub enum IngestMsg {
    /// One decoded UDP datagram (reading or unknown)
    Datagram(Decoded),
    /// One normalized image arrival
    Image(ImageEvent),
}

/// Ingestion counters, exposed through [`Health`]
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub datagrams: u64,
    pub decoded_binary: u64,
    pub decoded_json: u64,
    pub decoded_text: u64,
    pub unknown_packets: u64,
    pub checksum_mismatches: u64,
    pub duplicates: u64,
    pub images: u64,
    pub violations: u64,
    pub matched: u64,
    pub expired_unmatched: u64,
    pub evicted: u64,
    pub images_dropped: u64,
}

/// Point-in-time health snapshot.
///
/// Growing pending depths mean a stalled downstream; that is the
/// backpressure signal operators watch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub udp_listener_alive: bool,
    pub image_intake_alive: bool,
    pub pending: QueueDepths,
    pub stats: Statistics,
}

impl Default for Health {
    fn default() -> Self {
        Health {
            udp_listener_alive: false,
            image_intake_alive: false,
            pending: QueueDepths {
                violations: 0,
                images: 0,
            },
            stats: Statistics::default(),
        }
    }
}

/// Liveness flags owned by the feed subsystems, read by the ingest task
pub struct FeedLiveness {
    pub udp: Arc<AtomicBool>,
    pub intake: Arc<AtomicBool>,
}

impl FeedLiveness {
    pub fn new() -> Self {
        FeedLiveness {
            udp: Arc::new(AtomicBool::new(false)),
            intake: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for FeedLiveness {
    fn default() -> Self {
        Self::new()
    }
}

pub struct IngestTask {
    engine: CorrelationEngine,
    dedup: DedupStore,
    stats: Statistics,
    persister: ReadingPersister,
    recorder_tx: mpsc::Sender<CorrelatedViolation>,
    events: EventBus,
    health_tx: watch::Sender<Health>,
    liveness: FeedLiveness,
    rx: mpsc::Receiver<IngestMsg>,
    sweep_interval: Duration,
}

impl IngestTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: CorrelationEngine,
        dedup: DedupStore,
        persister: ReadingPersister,
        recorder_tx: mpsc::Sender<CorrelatedViolation>,
        events: EventBus,
        health_tx: watch::Sender<Health>,
        liveness: FeedLiveness,
        rx: mpsc::Receiver<IngestMsg>,
        sweep_interval: Duration,
    ) -> Self {
        IngestTask {
            engine,
            dedup,
            stats: Statistics::default(),
            persister,
            recorder_tx,
            events,
            health_tx,
            liveness,
            rx,
            sweep_interval,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        let mut sweep = interval(self.sweep_interval);
        // The first tick fires immediately; skip it
        sweep.tick().await;

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => break,
                _ = sweep.tick() => self.on_sweep().await,
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn handle(&mut self, msg: IngestMsg) {
        match msg {
            IngestMsg::Datagram(Decoded::Radar(event)) => self.handle_reading(event).await,
            IngestMsg::Datagram(Decoded::Unknown(unknown)) => {
                self.stats.unknown_packets += 1;
                debug!("unknown {}-byte datagram: {}", unknown.raw.len(), unknown.reason);
                publish(
                    &self.events,
                    DomainEvent::UnknownPacketObserved {
                        reason: unknown.reason.to_string(),
                        bytes: unknown.raw.len(),
                    },
                );
            }
            IngestMsg::Image(event) => self.handle_image(event).await,
        }
    }

    async fn handle_reading(&mut self, event: RadarEvent) {
        let now = Utc::now();
        self.stats.datagrams += 1;
        match event.source {
            velora_core::SourceFormat::Binary => self.stats.decoded_binary += 1,
            velora_core::SourceFormat::Json => self.stats.decoded_json += 1,
            velora_core::SourceFormat::Text => self.stats.decoded_text += 1,
        }
        if !event.checksum_ok {
            self.stats.checksum_mismatches += 1;
            warn!(
                "radar {}: accepted frame with checksum mismatch",
                event.radar_id
            );
        }

        if !self.dedup.check_and_remember(event.fingerprint(), now) {
            self.stats.duplicates += 1;
            debug!("duplicate reading from radar {} dropped", event.radar_id);
            return;
        }

        // Every deduplicated reading is persisted, violation or not;
        // the write happens off this task
        self.persister.spawn_persist(event.clone());

        if event.is_violation() {
            self.stats.violations += 1;
            let emitted = self.engine.on_violation(event, now);
            self.dispatch(emitted).await;
        }
    }

    async fn handle_image(&mut self, event: ImageEvent) {
        let now = Utc::now();
        self.stats.images += 1;
        let emitted = self.engine.on_image(event, now);
        self.dispatch(emitted).await;
    }

    async fn on_sweep(&mut self) {
        let now = Utc::now();
        let outcome = self.engine.sweep(now);
        if !outcome.expired.is_empty() || outcome.images_dropped > 0 {
            // Designed-for outcome, not a failure
            debug!(
                "sweep: {} violations expired unmatched, {} images dropped",
                outcome.expired.len(),
                outcome.images_dropped
            );
        }
        self.stats.images_dropped += outcome.images_dropped as u64;
        self.stats.expired_unmatched += outcome.expired.len() as u64;
        for violation in outcome.expired {
            self.send_to_recorder(violation).await;
        }

        let purged = self.dedup.purge(now);
        if purged > 0 {
            debug!("dedup purge removed {} fingerprints", purged);
        }

        self.publish_health();
    }

    /// Route engine emissions: matches and evictions both end at the recorder
    async fn dispatch(&mut self, emitted: Vec<CorrelatedViolation>) {
        for violation in emitted {
            if violation.matched {
                self.stats.matched += 1;
            } else {
                // Only ceiling evictions surface here unmatched
                self.stats.evicted += 1;
            }
            self.send_to_recorder(violation).await;
        }
    }

    async fn send_to_recorder(&self, violation: CorrelatedViolation) {
        if self.recorder_tx.send(violation).await.is_err() {
            warn!("recorder channel closed, violation dropped");
        }
    }

    fn publish_health(&self) {
        let health = Health {
            udp_listener_alive: self.liveness.udp.load(Ordering::Relaxed),
            image_intake_alive: self.liveness.intake.load(Ordering::Relaxed),
            pending: self.engine.depths(),
            stats: self.stats.clone(),
        };
        debug!(
            "health: pending {}v/{}i, {} datagrams, {} fines-path emissions",
            health.pending.violations,
            health.pending.images,
            health.stats.datagrams,
            health.stats.matched + health.stats.expired_unmatched + health.stats.evicted
        );
        let _ = self.health_tx.send(health);
    }

    async fn shutdown(&mut self) {
        // Drain whatever the producers already handed over
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg).await;
        }

        let flushed = self.engine.flush();
        if !flushed.is_empty() {
            info!(
                "shutdown: flushing {} pending violations as unmatched",
                flushed.len()
            );
        }
        self.stats.expired_unmatched += flushed.len() as u64;
        for violation in flushed {
            self.send_to_recorder(violation).await;
        }
        self.publish_health();
        // Dropping self.recorder_tx lets the recorder finish its queue
    }
}
