//! Best-effort delivery events.
//!
//! Publication never affects engine results: each event is handed to a
//! detached task with its own timeout, and failures end up in logs and
//! metrics only. Consumers must tolerate duplicates and reordering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::delivery::{PackageSize, Priority};
use crate::observability::metrics::Metrics;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestedEvent {
    pub delivery_id: Uuid,
    pub sender_id: Uuid,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub dropoff_latitude: f64,
    pub dropoff_longitude: f64,
    pub package_size: PackageSize,
    pub priority: Priority,
    pub estimated_fare: f64,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedEvent {
    pub delivery_id: Uuid,
    pub driver_id: Uuid,
    pub sender_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PickedUpEvent {
    pub delivery_id: Uuid,
    pub driver_id: Uuid,
    pub sender_id: Uuid,
    pub picked_up_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedEvent {
    pub delivery_id: Uuid,
    pub driver_id: Uuid,
    pub sender_id: Uuid,
    pub fare_amount: f64,
    pub distance_km: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Sender,
    Driver,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelledEvent {
    pub delivery_id: Uuid,
    pub sender_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub cancelled_by: CancelledBy,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnedEvent {
    pub delivery_id: Uuid,
    pub driver_id: Uuid,
    pub sender_id: Uuid,
    pub reason: Option<String>,
    pub returned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "subject", content = "data")]
pub enum DeliveryEvent {
    #[serde(rename = "deliveries.requested")]
    Requested(RequestedEvent),
    #[serde(rename = "deliveries.accepted")]
    Accepted(AcceptedEvent),
    #[serde(rename = "deliveries.picked_up")]
    PickedUp(PickedUpEvent),
    #[serde(rename = "deliveries.completed")]
    Completed(CompletedEvent),
    #[serde(rename = "deliveries.cancelled")]
    Cancelled(CancelledEvent),
    #[serde(rename = "deliveries.returned")]
    Returned(ReturnedEvent),
}

impl DeliveryEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            DeliveryEvent::Requested(_) => "deliveries.requested",
            DeliveryEvent::Accepted(_) => "deliveries.accepted",
            DeliveryEvent::PickedUp(_) => "deliveries.picked_up",
            DeliveryEvent::Completed(_) => "deliveries.completed",
            DeliveryEvent::Cancelled(_) => "deliveries.cancelled",
            DeliveryEvent::Returned(_) => "deliveries.returned",
        }
    }

    pub fn delivery_id(&self) -> Uuid {
        match self {
            DeliveryEvent::Requested(e) => e.delivery_id,
            DeliveryEvent::Accepted(e) => e.delivery_id,
            DeliveryEvent::PickedUp(e) => e.delivery_id,
            DeliveryEvent::Completed(e) => e.delivery_id,
            DeliveryEvent::Cancelled(e) => e.delivery_id,
            DeliveryEvent::Returned(e) => e.delivery_id,
        }
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: DeliveryEvent) -> Result<(), BusError>;
}

/// In-process bus fanning events out to websocket subscribers.
#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<DeliveryEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, event: DeliveryEvent) -> Result<(), BusError> {
        let subject = event.subject();
        if self.tx.send(event).is_err() {
            debug!(subject, "no event subscribers");
        }
        Ok(())
    }
}

/// Fire-and-forget front of an [`EventBus`].
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    timeout: Duration,
    slots: Arc<Semaphore>,
    metrics: Metrics,
}

impl EventPublisher {
    pub fn new(
        bus: Arc<dyn EventBus>,
        timeout: Duration,
        max_in_flight: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            bus,
            timeout,
            slots: Arc::new(Semaphore::new(max_in_flight.max(1))),
            metrics,
        }
    }

    /// Spawns the publish and returns immediately. When every slot is busy
    /// the event is dropped.
    pub fn emit(&self, event: DeliveryEvent) {
        let subject = event.subject();
        let delivery_id = event.delivery_id();

        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            warn!(subject, delivery_id = %delivery_id, "event dropped: publisher saturated");
            self.record("dropped");
            return;
        };

        let bus = self.bus.clone();
        let timeout = self.timeout;
        let publisher = self.clone();

        tokio::spawn(async move {
            let _permit = permit;
            publisher.metrics.events_in_flight.inc();

            let outcome = match tokio::time::timeout(timeout, bus.publish(event)).await {
                Ok(Ok(())) => "ok",
                Ok(Err(err)) => {
                    warn!(subject, delivery_id = %delivery_id, error = %err, "event publish failed");
                    "error"
                }
                Err(_) => {
                    warn!(subject, delivery_id = %delivery_id, "event publish timed out");
                    "timeout"
                }
            };

            publisher.metrics.events_in_flight.dec();
            publisher.record(outcome);
        });
    }

    fn record(&self, outcome: &str) {
        self.metrics
            .events_published_total
            .with_label_values(&[outcome])
            .inc();
    }
}
