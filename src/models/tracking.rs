use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Append-only audit record for a delivery.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: String,
    /// `status` without free text typed by the sender or driver; the only
    /// form shown on public tracking.
    #[serde(skip)]
    pub public_status: String,
    pub created_at: DateTime<Utc>,
}

impl TrackingEvent {
    pub fn new(delivery_id: Uuid, driver_id: Option<Uuid>, status: impl Into<String>) -> Self {
        let status = status.into();
        Self {
            id: Uuid::new_v4(),
            delivery_id,
            driver_id,
            latitude: None,
            longitude: None,
            public_status: status.clone(),
            status,
            created_at: Utc::now(),
        }
    }

    /// Appends caller-supplied text to `status` only.
    pub fn with_detail(mut self, separator: &str, detail: Option<&str>) -> Self {
        if let Some(detail) = detail {
            self.status = format!("{}{separator}{detail}", self.status);
        }
        self
    }

    pub fn at(mut self, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }
}
