use serde::Serialize;

use crate::error::AppError;
use crate::geo::{path_length_km, GeoPoint};
use crate::models::delivery::{PackageSize, Priority};

const AVERAGE_SPEED_KMH: f64 = 30.0;
const HANDLING_BUFFER_MIN: u32 = 10;
const PER_STOP_MIN: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct PricingConfig {
    pub base_fare_per_km: f64,
    pub minimum_fare: f64,
    pub express_premium: f64,
    /// Flat surge hook until a demand-based calculator exists.
    pub surge_multiplier: f64,
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fare_per_km: 1.50,
            minimum_fare: 5.00,
            express_premium: 1.5,
            surge_multiplier: 1.0,
            currency: "USD".to_string(),
        }
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        let positive = |value: f64| value.is_finite() && value > 0.0;
        if !positive(self.base_fare_per_km) || !positive(self.minimum_fare) {
            return Err(AppError::Internal(
                "invalid pricing: fares must be positive".to_string(),
            ));
        }
        if !self.express_premium.is_finite() || self.express_premium < 1.0 {
            return Err(AppError::Internal(
                "invalid EXPRESS_PREMIUM: must be >= 1.0".to_string(),
            ));
        }
        if !positive(self.surge_multiplier) {
            return Err(AppError::Internal(
                "invalid SURGE_MULTIPLIER: must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Inputs to a quote after enum parsing and coordinate checks.
#[derive(Debug, Clone)]
pub struct QuoteInput {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub stops: Vec<GeoPoint>,
    pub package_size: PackageSize,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FareEstimate {
    pub distance_km: f64,
    pub duration_min: u32,
    pub base_fare: f64,
    pub size_surcharge: f64,
    pub priority_surcharge: f64,
    pub surge_multiplier: f64,
    pub total: f64,
    pub currency: String,
    pub priority: Priority,
    pub package_size: PackageSize,
}

pub fn size_surcharge(size: PackageSize) -> f64 {
    match size {
        PackageSize::Envelope => 0.0,
        PackageSize::Small => 1.0,
        PackageSize::Medium => 3.0,
        PackageSize::Large => 8.0,
        PackageSize::Xlarge => 15.0,
    }
}

/// Route length: pickup, every stop in order, then dropoff.
pub fn route_distance_km(input: &QuoteInput) -> f64 {
    let mut points = Vec::with_capacity(input.stops.len() + 2);
    points.push(input.pickup);
    points.extend_from_slice(&input.stops);
    points.push(input.dropoff);
    path_length_km(&points)
}

pub fn estimate_duration_min(distance_km: f64, stop_count: usize) -> u32 {
    let driving = (distance_km / AVERAGE_SPEED_KMH * 60.0).ceil().max(0.0) as u32;
    driving + HANDLING_BUFFER_MIN + PER_STOP_MIN * stop_count as u32
}

pub fn quote(config: &PricingConfig, input: &QuoteInput) -> FareEstimate {
    let distance_km = route_distance_km(input);
    let duration_min = estimate_duration_min(distance_km, input.stops.len());

    let base_fare = (distance_km * config.base_fare_per_km).max(config.minimum_fare);
    let size = size_surcharge(input.package_size);
    let priority = match input.priority {
        Priority::Express => base_fare * (config.express_premium - 1.0),
        Priority::Standard | Priority::Scheduled => 0.0,
    };
    let surge = config.surge_multiplier;
    let total = (base_fare + size + priority) * surge;

    FareEstimate {
        distance_km: round_money(distance_km),
        duration_min,
        base_fare: round_money(base_fare),
        size_surcharge: round_money(size),
        priority_surcharge: round_money(priority),
        surge_multiplier: surge,
        total: round_money(total),
        currency: config.currency.clone(),
        priority: input.priority,
        package_size: input.package_size,
    }
}

/// Two decimals, halves rounded away from zero.
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
