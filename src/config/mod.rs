//! Configuration module for the train position backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Duration, FixedOffset};

/// Tuning constants for report validation and consensus.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Maximum reports kept per train
    pub window_size: usize,
    /// Reports older than this are ignored
    pub horizon: Duration,
    /// Age at which a report's weight halves
    pub half_life: Duration,
    /// How far ahead of the running median a report may be, in stops
    pub outlier_threshold: f64,
    /// How far behind the running median a report may be, in stops
    pub regression_tolerance: f64,
    /// Accepted clock drift for reports from the future
    pub clock_skew: Duration,
    /// Inlier count at which an estimate becomes confirmed
    pub min_confirmations: usize,
    /// Coordinates farther than this from the route are rejected
    pub max_off_route_km: f64,
    /// How far ahead of its timetable a report may place a running train,
    /// in stops; `inf` disables the check
    pub ahead_of_schedule_tolerance: f64,
    /// Offset of the timetable's wall clock from UTC
    pub timetable_offset: FixedOffset,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            horizon: Duration::seconds(600),
            half_life: Duration::seconds(120),
            outlier_threshold: 2.0,
            regression_tolerance: 0.5,
            clock_skew: Duration::seconds(30),
            min_confirmations: 3,
            max_off_route_km: 5.0,
            ahead_of_schedule_tolerance: 0.5,
            timetable_offset: FixedOffset::east_opt(6 * 3600).expect("UTC+6 is in range"),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for moderator endpoints
    pub moderator_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy station index directory
    pub index_path: PathBuf,
    /// Dataset file used to seed an empty database
    pub dataset_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines
    pub log_json: bool,
    /// Interval between horizon eviction sweeps
    pub sweep_interval: std::time::Duration,
    pub estimator: EstimatorConfig,
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("Invalid {} value '{}': {}", name, raw, e)),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let moderator_psk = env::var("FMT_MODERATOR_PSK").ok();

        let db_path = env::var("FMT_DB_PATH")
            .unwrap_or_else(|_| "./data/app.sqlite".to_string())
            .into();

        let index_path = env::var("FMT_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let dataset_path = env::var("FMT_DATASET_PATH")
            .unwrap_or_else(|_| "./data/dataset.json".to_string())
            .into();

        let bind_addr = env::var("FMT_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid FMT_BIND_ADDR format");

        let log_level = env::var("FMT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = parse_var("FMT_LOG_JSON", false);
        let sweep_interval =
            std::time::Duration::from_secs(parse_var("FMT_SWEEP_INTERVAL_SECS", 30u64));

        let defaults = EstimatorConfig::default();
        let offset_minutes: i32 = parse_var("FMT_TIMETABLE_UTC_OFFSET_MINUTES", 360);
        let estimator = EstimatorConfig {
            window_size: parse_var("FMT_WINDOW_SIZE", defaults.window_size),
            horizon: Duration::seconds(parse_var("FMT_HORIZON_SECS", 600i64)),
            half_life: Duration::seconds(parse_var("FMT_HALF_LIFE_SECS", 120i64)),
            outlier_threshold: parse_var("FMT_OUTLIER_THRESHOLD", defaults.outlier_threshold),
            regression_tolerance: parse_var(
                "FMT_REGRESSION_TOLERANCE",
                defaults.regression_tolerance,
            ),
            clock_skew: Duration::seconds(parse_var("FMT_CLOCK_SKEW_SECS", 30i64)),
            min_confirmations: parse_var("FMT_MIN_CONFIRMATIONS", defaults.min_confirmations),
            max_off_route_km: parse_var("FMT_MAX_OFF_ROUTE_KM", defaults.max_off_route_km),
            ahead_of_schedule_tolerance: parse_var(
                "FMT_AHEAD_OF_SCHEDULE_TOLERANCE",
                defaults.ahead_of_schedule_tolerance,
            ),
            timetable_offset: FixedOffset::east_opt(offset_minutes * 60)
                .expect("Invalid FMT_TIMETABLE_UTC_OFFSET_MINUTES"),
        };

        assert!(estimator.window_size > 0, "FMT_WINDOW_SIZE must be positive");
        assert!(
            estimator.half_life > Duration::zero() && estimator.horizon > Duration::zero(),
            "FMT_HALF_LIFE_SECS and FMT_HORIZON_SECS must be positive"
        );
        assert!(
            !sweep_interval.is_zero(),
            "FMT_SWEEP_INTERVAL_SECS must be positive"
        );

        Self {
            moderator_psk,
            db_path,
            index_path,
            dataset_path,
            bind_addr,
            log_level,
            log_json,
            sweep_interval,
            estimator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        for var in [
            "FMT_MODERATOR_PSK",
            "FMT_DB_PATH",
            "FMT_INDEX_PATH",
            "FMT_DATASET_PATH",
            "FMT_BIND_ADDR",
            "FMT_LOG_LEVEL",
            "FMT_HORIZON_SECS",
            "FMT_WINDOW_SIZE",
            "FMT_TIMETABLE_UTC_OFFSET_MINUTES",
        ] {
            env::remove_var(var);
        }

        let config = Config::from_env();

        assert!(config.moderator_psk.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/app.sqlite"));
        assert_eq!(config.index_path, PathBuf::from("./data/index"));
        assert_eq!(config.dataset_path, PathBuf::from("./data/dataset.json"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.estimator.horizon, Duration::seconds(600));
        assert_eq!(config.estimator.window_size, 50);
        assert_eq!(config.estimator.timetable_offset.local_minus_utc(), 6 * 3600);
    }
}
