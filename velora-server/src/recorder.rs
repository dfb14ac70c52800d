//! Violation recorder
//!
//! Consumes [`CorrelatedViolation`]s from the correlation task and turns
//! each into a persisted [`Fine`]: best-effort plate recognition on the
//! closest evidence image, amount from the fine schedule, storage write
//! with bounded retries, and a `FineCreated` event on success.
//!
//! Recognition runs under a timeout and its failure is never fatal - a
//! violation with no readable plate is billed to "UNKNOWN". After shutdown
//! is requested the recorder keeps draining its queue until the ingest
//! task has dropped its sender, so flushed violations are still billed.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_graceful_shutdown::SubsystemHandle;

use velora_core::{CorrelatedViolation, Fine, FineSchedule, FineStatus, UNKNOWN_PLATE};

use crate::error::ServerError;
use crate::events::{publish, DomainEvent, EventBus};
use crate::persist::{with_retries, PERSIST_ATTEMPTS, PERSIST_BASE_DELAY};
use crate::recognition::PlateRecognizer;
use crate::storage::Storage;

pub struct ViolationRecorder {
    storage: Arc<dyn Storage>,
    recognizer: Arc<dyn PlateRecognizer>,
    schedule: FineSchedule,
    events: EventBus,
    recognition_timeout: std::time::Duration,
    rx: mpsc::Receiver<CorrelatedViolation>,
}

impl ViolationRecorder {
    pub fn new(
        storage: Arc<dyn Storage>,
        recognizer: Arc<dyn PlateRecognizer>,
        schedule: FineSchedule,
        events: EventBus,
        recognition_timeout: std::time::Duration,
        rx: mpsc::Receiver<CorrelatedViolation>,
    ) -> Self {
        ViolationRecorder {
            storage,
            recognizer,
            schedule,
            events,
            recognition_timeout,
            rx,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => break,
                v = self.rx.recv() => match v {
                    Some(violation) => self.record(violation).await,
                    None => return Ok(()),
                },
            }
        }

        // Drain until the ingest task drops its sender; this is where
        // flushed-at-shutdown violations get billed
        while let Some(violation) = self.rx.recv().await {
            self.record(violation).await;
        }
        Ok(())
    }

    /// Turn one correlated violation into a persisted fine
    pub async fn record(&self, violation: CorrelatedViolation) {
        let fine = self.build_fine(&violation).await;

        match with_retries("save_fine", PERSIST_ATTEMPTS, PERSIST_BASE_DELAY, || {
            self.storage.save_fine(&fine)
        })
        .await
        {
            Ok(true) => {
                info!(
                    "fine {}: plate {} radar {} {} km/h in {} zone, amount {}",
                    fine.correlation_id,
                    fine.plate,
                    violation.radar_event.radar_id,
                    fine.speed,
                    fine.speed_limit,
                    fine.amount
                );
                publish(&self.events, DomainEvent::FineCreated { fine });
            }
            Ok(false) => debug!("fine {} already on record", fine.correlation_id),
            // Exhausted retries: fatal for this one event only
            Err(e) => error!("fine {} not persisted: {}", fine.correlation_id, e),
        }
    }

    async fn build_fine(&self, violation: &CorrelatedViolation) -> Fine {
        let event = &violation.radar_event;
        let image_path = violation.primary_image().map(|img| img.path.clone());

        // Plate precedence: carried on the wire, then recognized from the
        // closest image, then unknown
        let plate = match &event.plate {
            Some(plate) => plate.clone(),
            None => match violation.primary_image() {
                Some(image) => self.recognize_plate(&image.path).await,
                None => UNKNOWN_PLATE.to_string(),
            },
        };

        Fine {
            plate,
            speed: event.speed,
            speed_limit: event.speed_limit,
            amount: self.schedule.amount(event.excess()),
            image_path,
            status: FineStatus::Pending,
            correlation_id: violation.correlation_id.clone(),
            issued_at: Utc::now(),
        }
    }

    async fn recognize_plate(&self, image: &std::path::Path) -> String {
        match timeout(self.recognition_timeout, self.recognizer.recognize(image)).await {
            Ok(Ok(read)) => {
                debug!(
                    "recognized {} (confidence {:.2}) in {}",
                    read.plate,
                    read.confidence,
                    image.display()
                );
                read.plate
            }
            Ok(Err(e)) => {
                warn!("recognition failed for {}: {}", image.display(), e);
                UNKNOWN_PLATE.to_string()
            }
            Err(_) => {
                warn!(
                    "recognition timed out after {:?} for {}",
                    self.recognition_timeout,
                    image.display()
                );
                UNKNOWN_PLATE.to_string()
            }
        }
    }
}
