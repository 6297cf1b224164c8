use std::env;
use std::time::Duration;

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
    pub order_queue_size: usize,
    pub event_buffer_size: usize,
    pub dispatch: DispatchConfig,
    pub tracking: TrackingConfig,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Run the background matching loop for newly placed orders.
    pub auto_dispatch: bool,
    pub retry_delay: Duration,
    /// Drivers whose `available_since` falls in the same window count as equally waiting.
    pub fairness_window: Duration,
    pub comparable_distance_km: f64,
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub retention: Duration,
    pub clock_skew_tolerance: Duration,
    pub sweep_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            auto_dispatch: false,
            retry_delay: Duration::from_millis(250),
            fairness_window: Duration::from_secs(60),
            comparable_distance_km: 0.5,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(600),
            clock_skew_tolerance: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            order_queue_size: 1024,
            event_buffer_size: 1024,
            dispatch: DispatchConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact or json"
                )));
            }
        };

        let dispatch = DispatchConfig {
            auto_dispatch: parse_or_default("AUTO_DISPATCH", defaults.dispatch.auto_dispatch)?,
            retry_delay: Duration::from_millis(parse_or_default(
                "DISPATCH_RETRY_DELAY_MS",
                defaults.dispatch.retry_delay.as_millis() as u64,
            )?),
            fairness_window: Duration::from_secs(parse_or_default(
                "FAIRNESS_WINDOW_SECS",
                defaults.dispatch.fairness_window.as_secs(),
            )?),
            comparable_distance_km: parse_or_default(
                "COMPARABLE_DISTANCE_KM",
                defaults.dispatch.comparable_distance_km,
            )?,
        };

        let tracking = TrackingConfig {
            retention: Duration::from_secs(parse_or_default(
                "LOCATION_RETENTION_SECS",
                defaults.tracking.retention.as_secs(),
            )?),
            clock_skew_tolerance: Duration::from_secs(parse_or_default(
                "CLOCK_SKEW_TOLERANCE_SECS",
                defaults.tracking.clock_skew_tolerance.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(parse_or_default(
                "SWEEP_INTERVAL_SECS",
                defaults.tracking.sweep_interval.as_secs(),
            )?),
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            order_queue_size: parse_or_default("ORDER_QUEUE_SIZE", defaults.order_queue_size)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            dispatch,
            tracking,
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
