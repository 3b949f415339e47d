use std::env;

use chrono::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub tracking_queue_size: usize,
    pub customer_channel_size: usize,
    pub tracking: TrackingSettings,
}

/// Knobs of the tracking engine. `Default` mirrors production values.
#[derive(Debug, Clone)]
pub struct TrackingSettings {
    /// Cached locations older than this fall back to the persisted driver location.
    pub location_ttl_secs: i64,
    /// Minimum gap between two persisted location-history samples.
    pub history_interval_secs: i64,
    /// Geofence used for arrival detection.
    pub arrival_radius_meters: f64,
    /// Attempts for a compare-and-swap write before giving up.
    pub write_retries: u32,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            location_ttl_secs: 60,
            history_interval_secs: 30,
            arrival_radius_meters: 100.0,
            write_retries: 3,
        }
    }
}

impl TrackingSettings {
    pub fn location_ttl(&self) -> Duration {
        Duration::seconds(self.location_ttl_secs)
    }

    pub fn history_interval(&self) -> Duration {
        Duration::seconds(self.history_interval_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = TrackingSettings::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tracking_queue_size: parse_or_default("TRACKING_QUEUE_SIZE", 1024)?,
            customer_channel_size: parse_or_default("CUSTOMER_CHANNEL_SIZE", 1024)?,
            tracking: TrackingSettings {
                location_ttl_secs: parse_or_default("LOCATION_TTL_SECS", defaults.location_ttl_secs)?,
                history_interval_secs: parse_or_default(
                    "HISTORY_INTERVAL_SECS",
                    defaults.history_interval_secs,
                )?,
                arrival_radius_meters: parse_or_default(
                    "ARRIVAL_RADIUS_METERS",
                    defaults.arrival_radius_meters,
                )?,
                write_retries: parse_or_default("WRITE_RETRIES", defaults.write_retries)?,
            },
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
