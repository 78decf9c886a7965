use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Pending,
    Arrived,
    Completed,
}

impl StopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopStatus::Pending => "pending",
            StopStatus::Arrived => "arrived",
            StopStatus::Completed => "completed",
        }
    }
}

impl FromStr for StopStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StopStatus::Pending),
            "arrived" => Ok(StopStatus::Arrived),
            "completed" => Ok(StopStatus::Completed),
            other => Err(AppError::bad_request(format!(
                "invalid stop status: {other}, expected pending/arrived/completed"
            ))),
        }
    }
}

/// Intermediate waypoint; `stop_order` is 1-based and dense per delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStop {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub stop_order: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
    pub status: StopStatus,
    pub arrived_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub proof_photo_url: Option<String>,
}
