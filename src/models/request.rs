use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::delivery::DeliveryStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct StopInput {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Enum-valued fields arrive as strings so unknown values surface as a
/// `BadRequest` from the engine instead of a body rejection.
#[derive(Debug, Clone, Deserialize)]
pub struct EstimateRequest {
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub dropoff_latitude: f64,
    pub dropoff_longitude: f64,
    pub package_size: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub stops: Vec<StopInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeliveryRequest {
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: String,
    #[serde(default)]
    pub pickup_contact: Option<String>,
    #[serde(default)]
    pub pickup_phone: Option<String>,
    #[serde(default)]
    pub pickup_notes: Option<String>,

    pub dropoff_latitude: f64,
    pub dropoff_longitude: f64,
    pub dropoff_address: String,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub recipient_phone: Option<String>,
    #[serde(default)]
    pub dropoff_notes: Option<String>,

    pub package_size: String,
    #[serde(default)]
    pub package_description: Option<String>,
    #[serde(default)]
    pub declared_value: Option<f64>,
    #[serde(default)]
    pub is_fragile: bool,
    #[serde(default)]
    pub requires_signature: bool,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub scheduled_pickup_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stops: Vec<StopInput>,
}

impl CreateDeliveryRequest {
    pub fn estimate_request(&self) -> EstimateRequest {
        EstimateRequest {
            pickup_latitude: self.pickup_latitude,
            pickup_longitude: self.pickup_longitude,
            dropoff_latitude: self.dropoff_latitude,
            dropoff_longitude: self.dropoff_longitude,
            package_size: self.package_size.clone(),
            priority: self.priority.clone(),
            stops: self.stops.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmPickupRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmDeliveryRequest {
    pub proof_type: String,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub signature_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// `rating` is kept raw so a missing, fractional or non-numeric value is
/// reported by the engine as a bad request rather than a body rejection.
#[derive(Debug, Clone, Deserialize)]
pub struct RateRequest {
    #[serde(default)]
    pub rating: serde_json::Value,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStopRequest {
    pub status: String,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<DeliveryStatus>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailableQuery {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub radius_km: Option<f64>,
}
