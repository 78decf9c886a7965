use std::env;
use std::time::Duration;

use crate::engine::pricing::PricingConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub engine: EngineConfig,
}

/// Knobs consumed by the lifecycle engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pricing: PricingConfig,
    pub available_radius_km: f64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub event_publish_timeout: Duration,
    pub event_max_in_flight: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pricing: PricingConfig::default(),
            available_radius_km: 15.0,
            default_page_size: 20,
            max_page_size: 100,
            event_publish_timeout: Duration::from_secs(5),
            event_max_in_flight: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 1024,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();
        let pricing_defaults = defaults.engine.pricing.clone();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) => match raw.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                other => {
                    return Err(AppError::Internal(format!("invalid LOG_FORMAT: {other}")));
                }
            },
            Err(_) => defaults.log_format,
        };

        let pricing = PricingConfig {
            base_fare_per_km: parse_or_default("BASE_FARE_PER_KM", pricing_defaults.base_fare_per_km)?,
            minimum_fare: parse_or_default("MINIMUM_FARE", pricing_defaults.minimum_fare)?,
            express_premium: parse_or_default("EXPRESS_PREMIUM", pricing_defaults.express_premium)?,
            surge_multiplier: parse_or_default("SURGE_MULTIPLIER", pricing_defaults.surge_multiplier)?,
            currency: env::var("CURRENCY").unwrap_or(pricing_defaults.currency),
        };
        pricing.validate()?;

        let engine = EngineConfig {
            pricing,
            available_radius_km: parse_or_default(
                "AVAILABLE_RADIUS_KM",
                defaults.engine.available_radius_km,
            )?,
            default_page_size: parse_or_default("DEFAULT_PAGE_SIZE", defaults.engine.default_page_size)?,
            max_page_size: parse_or_default("MAX_PAGE_SIZE", defaults.engine.max_page_size)?,
            event_publish_timeout: Duration::from_secs(parse_or_default(
                "EVENT_PUBLISH_TIMEOUT_SECS",
                defaults.engine.event_publish_timeout.as_secs(),
            )?),
            event_max_in_flight: parse_or_default(
                "EVENT_MAX_IN_FLIGHT",
                defaults.engine.event_max_in_flight,
            )?,
        };

        if engine.default_page_size == 0 || engine.default_page_size > engine.max_page_size {
            return Err(AppError::Internal(
                "invalid DEFAULT_PAGE_SIZE: must be between 1 and MAX_PAGE_SIZE".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            engine,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
