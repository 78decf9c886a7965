//! Persistence capability consumed by the lifecycle engine.
//!
//! Every state-changing method is a single conditional update: the
//! precondition lives in the match predicate, so two concurrent callers can
//! never both observe success.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::delivery::{Delivery, DeliveryStatus, ProofType};
use crate::models::stop::{DeliveryStop, StopStatus};
use crate::models::tracking::TrackingEvent;
use crate::models::view::{Page, SenderFilter, SenderStats};

pub use memory::MemoryStore;

/// Upper bound on rows returned by `list_available`.
pub const AVAILABLE_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tracking code {0} already exists")]
    DuplicateTrackingCode(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    /// The row was no longer `requested` with no driver.
    AlreadyTaken,
    /// The driver already holds a claimed delivery.
    DriverBusy,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub proof_type: ProofType,
    pub photo_url: Option<String>,
    pub signature_url: Option<String>,
    pub final_fare: f64,
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Inserts the delivery and its stops atomically.
    async fn create_delivery(
        &self,
        delivery: Delivery,
        stops: Vec<DeliveryStop>,
    ) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Delivery>, StoreError>;

    async fn get_by_tracking_code(&self, code: &str) -> Result<Option<Delivery>, StoreError>;

    async fn get_active_for_driver(&self, driver_id: Uuid)
        -> Result<Option<Delivery>, StoreError>;

    /// Open deliveries near `origin`, express first, then oldest first.
    async fn list_available(
        &self,
        origin: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<Delivery>, StoreError>;

    async fn list_for_sender(
        &self,
        sender_id: Uuid,
        filter: &SenderFilter,
        page: Page,
    ) -> Result<Vec<Delivery>, StoreError>;

    async fn list_for_driver(&self, driver_id: Uuid, page: Page)
        -> Result<Vec<Delivery>, StoreError>;

    /// `requested -> accepted` with `driver_id` set, iff no driver yet.
    async fn atomic_accept(&self, id: Uuid, driver_id: Uuid)
        -> Result<AcceptOutcome, StoreError>;

    /// Moves a driver-owned delivery from `expected` to `status`.
    async fn update_status(
        &self,
        id: Uuid,
        driver_id: Uuid,
        expected: DeliveryStatus,
        status: DeliveryStatus,
    ) -> Result<bool, StoreError>;

    /// Marks delivered, gated on `in_transit | arrived` and ownership.
    async fn atomic_complete(
        &self,
        id: Uuid,
        driver_id: Uuid,
        completion: Completion,
    ) -> Result<bool, StoreError>;

    async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<bool, StoreError>;

    async fn mark_returned(
        &self,
        id: Uuid,
        driver_id: Uuid,
        reason: Option<String>,
    ) -> Result<bool, StoreError>;

    /// Sets the sender's rating once, on delivered rows only.
    async fn rate_by_sender(
        &self,
        id: Uuid,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<bool, StoreError>;

    async fn rate_by_driver(
        &self,
        id: Uuid,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<bool, StoreError>;

    async fn append_tracking_event(&self, event: TrackingEvent) -> Result<(), StoreError>;

    async fn list_tracking_events(&self, delivery_id: Uuid)
        -> Result<Vec<TrackingEvent>, StoreError>;

    async fn list_stops(&self, delivery_id: Uuid) -> Result<Vec<DeliveryStop>, StoreError>;

    /// Returns the updated stop, or `None` when it does not belong to the delivery.
    async fn update_stop_status(
        &self,
        delivery_id: Uuid,
        stop_id: Uuid,
        status: StopStatus,
        photo_url: Option<String>,
    ) -> Result<Option<DeliveryStop>, StoreError>;

    async fn aggregate_sender_stats(&self, sender_id: Uuid) -> Result<SenderStats, StoreError>;
}
