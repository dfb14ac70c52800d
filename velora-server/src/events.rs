//! Outward domain events
//!
//! The dashboard / broadcast layer is an external collaborator; this
//! channel is the boundary it consumes. Delivery is at-least-once and
//! lossy under lag (slow consumers see `Lagged`), so consumers dedupe on
//! `correlationId` / fine identity.

use serde::Serialize;
use tokio::sync::broadcast;

use velora_core::{Fine, RadarEvent};

/// Capacity of the broadcast ring; laggards lose oldest events first
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events crossing the boundary to the (external) broadcast layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomainEvent {
    /// A decoded reading was durably persisted
    RadarEventPersisted { event: RadarEvent },
    /// A fine was created for a correlated violation
    FineCreated { fine: Fine },
    /// A datagram no wire format recognized
    UnknownPacketObserved { reason: String, bytes: usize },
}

/// Sender half of the domain event bus.
///
/// Subscribe with [`broadcast::Sender::subscribe`]; a send with no
/// subscribers is not an error.
pub type EventBus = broadcast::Sender<DomainEvent>;

pub fn event_bus() -> EventBus {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Publish an event, ignoring the no-subscriber case
pub fn publish(bus: &EventBus, event: DomainEvent) {
    let _ = bus.send(event);
}
