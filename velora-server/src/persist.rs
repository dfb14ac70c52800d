//! Reading persistence off the correlation path
//!
//! Storage writes are potentially blocking I/O and must never run while
//! the ingest task is holding its state; the persister is handed an event
//! after the ingest bookkeeping is done and does its work on a spawned
//! task, retrying transient failures with a doubling backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::time::sleep;

use velora_core::RadarEvent;

use crate::events::{publish, DomainEvent, EventBus};
use crate::storage::Storage;

/// How often a failed storage call is attempted in total
pub const PERSIST_ATTEMPTS: u32 = 3;

/// Delay before the second attempt; doubles per retry
pub const PERSIST_BASE_DELAY: Duration = Duration::from_millis(250);

/// Run a fallible async operation with bounded retries.
///
/// Waits `base_delay` after the first failure, doubling after each
/// further failure. Returns the last error when attempts are exhausted.
pub async fn with_retries<T, E, F, Fut>(
    what: &str,
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                debug!("{} attempt {}/{} failed: {}", what, attempt, attempts, e);
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Writes every decoded reading to storage, violation or not
pub struct ReadingPersister {
    storage: Arc<dyn Storage>,
    events: EventBus,
}

impl ReadingPersister {
    pub fn new(storage: Arc<dyn Storage>, events: EventBus) -> Self {
        ReadingPersister { storage, events }
    }

    /// Persist a reading on a spawned task.
    ///
    /// Failures are scoped to this one event: logged and counted by the
    /// caller-visible log line, never propagated to the ingest loop.
    pub fn spawn_persist(&self, event: RadarEvent) {
        let storage = Arc::clone(&self.storage);
        let events = self.events.clone();
        tokio::spawn(async move {
            let radar = with_retries("find_or_create_radar", PERSIST_ATTEMPTS, PERSIST_BASE_DELAY, || {
                storage.find_or_create_radar(event.radar_id, event.speed_limit)
            })
            .await;
            if let Err(e) = radar {
                error!("radar {} registration failed, reading dropped: {}", event.radar_id, e);
                return;
            }

            match with_retries("save_reading", PERSIST_ATTEMPTS, PERSIST_BASE_DELAY, || {
                storage.save_reading(&event)
            })
            .await
            {
                Ok(()) => publish(&events, DomainEvent::RadarEventPersisted { event }),
                Err(e) => error!("reading from radar {} not persisted: {}", event.radar_id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retries_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            with_retries("op", 3, Duration::from_millis(1), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_gives_up_after_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            with_retries("op", 3, Duration::from_millis(1), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
