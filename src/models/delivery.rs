use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PackageSize {
    Envelope,
    Small,
    Medium,
    Large,
    Xlarge,
}

impl PackageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageSize::Envelope => "envelope",
            PackageSize::Small => "small",
            PackageSize::Medium => "medium",
            PackageSize::Large => "large",
            PackageSize::Xlarge => "xlarge",
        }
    }
}

impl FromStr for PackageSize {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "envelope" => Ok(PackageSize::Envelope),
            "small" => Ok(PackageSize::Small),
            "medium" => Ok(PackageSize::Medium),
            "large" => Ok(PackageSize::Large),
            "xlarge" => Ok(PackageSize::Xlarge),
            other => Err(AppError::bad_request(format!(
                "invalid package size: {other}, expected envelope/small/medium/large/xlarge"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Standard,
    Express,
    Scheduled,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Standard => "standard",
            Priority::Express => "express",
            Priority::Scheduled => "scheduled",
        }
    }

    /// Rank used when listing open deliveries; lower is served first.
    pub fn dispatch_rank(&self) -> u8 {
        match self {
            Priority::Express => 0,
            Priority::Standard => 1,
            Priority::Scheduled => 2,
        }
    }
}

impl FromStr for Priority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Priority::Standard),
            "express" => Ok(Priority::Express),
            "scheduled" => Ok(Priority::Scheduled),
            other => Err(AppError::bad_request(format!(
                "invalid priority: {other}, expected standard/express/scheduled"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Requested,
    Accepted,
    PickingUp,
    PickedUp,
    InTransit,
    Arrived,
    Delivered,
    Returned,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 10] = [
        DeliveryStatus::Requested,
        DeliveryStatus::Accepted,
        DeliveryStatus::PickingUp,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
        DeliveryStatus::Arrived,
        DeliveryStatus::Delivered,
        DeliveryStatus::Returned,
        DeliveryStatus::Failed,
        DeliveryStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Requested => "requested",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::PickingUp => "picking_up",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Arrived => "arrived",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Returned => "returned",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered
                | DeliveryStatus::Cancelled
                | DeliveryStatus::Returned
                | DeliveryStatus::Failed
        )
    }

    /// A driver holding a delivery in one of these states is busy.
    pub fn is_claimed(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Accepted
                | DeliveryStatus::PickingUp
                | DeliveryStatus::PickedUp
                | DeliveryStatus::InTransit
                | DeliveryStatus::Arrived
        )
    }

    /// The package is in the driver's hands.
    pub fn is_past_pickup(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::PickedUp | DeliveryStatus::InTransit | DeliveryStatus::Arrived
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::bad_request(format!("invalid status: {s}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    Pin,
    Photo,
    Signature,
    Contactless,
}

impl ProofType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofType::Pin => "pin",
            ProofType::Photo => "photo",
            ProofType::Signature => "signature",
            ProofType::Contactless => "contactless",
        }
    }
}

impl FromStr for ProofType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pin" => Ok(ProofType::Pin),
            "photo" => Ok(ProofType::Photo),
            "signature" => Ok(ProofType::Signature),
            "contactless" => Ok(ProofType::Contactless),
            other => Err(AppError::bad_request(format!(
                "invalid proof type: {other}, expected pin/photo/signature/contactless"
            ))),
        }
    }
}

/// Delivery PIN held by the server. It has no `Serialize` impl and a redacted
/// `Debug`, so it cannot leak through a response body or a log line.
#[derive(Clone, PartialEq, Eq)]
pub struct ProofPin(String);

impl ProofPin {
    pub fn new(pin: String) -> Self {
        Self(pin)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProofPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProofPin([REDACTED])")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub id: Uuid,
    pub tracking_code: String,
    pub sender_id: Uuid,
    pub driver_id: Option<Uuid>,

    pub package_size: PackageSize,
    pub package_description: Option<String>,
    pub declared_value: Option<f64>,
    pub is_fragile: bool,
    pub requires_signature: bool,
    pub priority: Priority,
    pub scheduled_pickup_at: Option<DateTime<Utc>>,

    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: String,
    pub pickup_contact: Option<String>,
    pub pickup_phone: Option<String>,
    pub pickup_notes: Option<String>,

    pub dropoff_latitude: f64,
    pub dropoff_longitude: f64,
    pub dropoff_address: String,
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,
    pub dropoff_notes: Option<String>,

    pub estimated_distance_km: f64,
    pub estimated_duration_min: u32,
    pub estimated_fare: f64,
    pub surge_multiplier: f64,
    pub final_fare: Option<f64>,

    #[serde(skip)]
    pub proof_pin: ProofPin,
    pub proof_type: Option<ProofType>,
    pub proof_photo_url: Option<String>,
    pub signature_url: Option<String>,

    pub status: DeliveryStatus,
    pub cancellation_reason: Option<String>,
    pub return_reason: Option<String>,

    pub sender_rating: Option<u8>,
    pub sender_feedback: Option<String>,
    pub driver_rating: Option<u8>,
    pub driver_feedback: Option<String>,

    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn pickup_point(&self) -> GeoPoint {
        GeoPoint::new(self.pickup_latitude, self.pickup_longitude)
    }

    pub fn is_sender(&self, actor_id: Uuid) -> bool {
        self.sender_id == actor_id
    }

    pub fn is_driver(&self, actor_id: Uuid) -> bool {
        self.driver_id == Some(actor_id)
    }
}
