use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::delivery::{Delivery, DeliveryStatus, PackageSize, Priority};
use crate::models::stop::{DeliveryStop, StopStatus};
use crate::models::tracking::TrackingEvent;

/// Full delivery as seen by its sender or assigned driver.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryDetail {
    #[serde(flatten)]
    pub delivery: Delivery,
    pub stops: Vec<DeliveryStop>,
    pub tracking_events: Vec<TrackingEvent>,
}

/// Public projection served by tracking code. Carries no phone numbers,
/// contact names, declared value, or PIN.
#[derive(Debug, Clone, Serialize)]
pub struct PublicTracking {
    pub tracking_code: String,
    pub status: DeliveryStatus,
    pub package_size: PackageSize,
    pub priority: Priority,
    pub is_fragile: bool,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub estimated_distance_km: f64,
    pub estimated_duration_min: u32,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub stops: Vec<PublicStop>,
    pub events: Vec<PublicTrackingEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicStop {
    pub stop_order: u32,
    pub address: String,
    pub status: StopStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicTrackingEvent {
    pub status: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PublicTracking {
    pub fn project(delivery: &Delivery, stops: &[DeliveryStop], events: &[TrackingEvent]) -> Self {
        Self {
            tracking_code: delivery.tracking_code.clone(),
            status: delivery.status,
            package_size: delivery.package_size,
            priority: delivery.priority,
            is_fragile: delivery.is_fragile,
            pickup_address: delivery.pickup_address.clone(),
            dropoff_address: delivery.dropoff_address.clone(),
            estimated_distance_km: delivery.estimated_distance_km,
            estimated_duration_min: delivery.estimated_duration_min,
            requested_at: delivery.requested_at,
            accepted_at: delivery.accepted_at,
            picked_up_at: delivery.picked_up_at,
            delivered_at: delivery.delivered_at,
            cancelled_at: delivery.cancelled_at,
            stops: stops
                .iter()
                .map(|stop| PublicStop {
                    stop_order: stop.stop_order,
                    address: stop.address.clone(),
                    status: stop.status,
                })
                .collect(),
            events: events
                .iter()
                .map(|event| PublicTrackingEvent {
                    status: event.public_status.clone(),
                    latitude: event.latitude,
                    longitude: event.longitude,
                    timestamp: event.created_at,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SenderStats {
    pub total_deliveries: u64,
    pub active_deliveries: u64,
    pub delivered: u64,
    pub cancelled: u64,
    pub returned: u64,
    pub total_spent: f64,
    pub average_rating_given: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SenderFilter {
    pub status: Option<DeliveryStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryList {
    pub deliveries: Vec<Delivery>,
    pub limit: u32,
    pub offset: u32,
}
