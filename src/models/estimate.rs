//! Derived position estimates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Whether enough independent reports back the estimate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EstimateStatus {
    Confirmed,
    Unconfirmed,
}

/// Consensus position of one train.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionEstimate {
    pub train_id: String,
    pub route_revision: i64,
    /// Fractional index along the stop sequence.
    pub route_progress: f64,
    /// Index of the last stop reached.
    pub station_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<GeoPoint>,
    pub nearest_station_id: String,
    pub confidence: f64,
    pub status: EstimateStatus,
    /// Newest report that contributed to the estimate.
    pub last_updated: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
    /// After this instant the estimate reads as unknown.
    pub expires_at: DateTime<Utc>,
    pub supporting_report_count: usize,
    pub discarded_report_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_progress: Option<f64>,
}

impl PositionEstimate {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
