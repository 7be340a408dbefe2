//! Crowdsourced location reports.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Epoch values above this are treated as milliseconds.
const MILLIS_THRESHOLD: i64 = 2_500_000_000;

/// Where the reporter claims the train is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaimedPosition {
    /// At or near a station on the route.
    Station {
        #[serde(rename = "stationId")]
        station_id: String,
    },
    /// Raw device coordinate.
    Coordinate { lat: f64, lon: f64 },
    /// Fractional index along the stop sequence, as computed on the device.
    Progress { value: f64 },
}

/// Request body for `POST /api/reports`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReportRequest {
    pub train_id: String,
    pub reporter_token: String,
    /// Epoch seconds or milliseconds.
    pub submitted_at: i64,
    pub position: ClaimedPosition,
}

/// A report that passed structural checks.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub train_id: String,
    pub reporter_token: String,
    pub submitted_at: DateTime<Utc>,
    pub claimed_position: ClaimedPosition,
}

/// Normalize an epoch timestamp given in seconds or milliseconds.
pub fn epoch_to_datetime(raw: i64) -> Option<DateTime<Utc>> {
    if raw > MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}
