//! Reference dataset models: stations, trains and their timetables.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Stations without surveyed coordinates are published at `(0, 0)`.
    pub fn is_known(&self) -> bool {
        !(self.lat == 0.0 && self.lon == 0.0)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A station on the network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    pub name: String,
    pub location: GeoPoint,
}

/// How a train treats a station on its route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    RegularStop,
    PassThrough,
    Landmark,
}

/// One entry in a train's journey.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub station_id: String,
    pub stop_kind: StopKind,
    /// Wall-clock time in the timetable timezone, `None` when unscheduled.
    #[serde(default, with = "crate::timetable::hhmm")]
    pub scheduled_time: Option<NaiveTime>,
}

/// A train and its ordered stop sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Train {
    pub id: String,
    pub name: String,
    pub stops: Vec<Stop>,
    /// Revision at which `stops` last changed.
    #[serde(default)]
    pub route_revision: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub off_days: Vec<String>,
}

impl Train {
    /// Indices of every stop at `station_id`, in journey order.
    pub fn stop_indices(&self, station_id: &str) -> Vec<usize> {
        self.stops
            .iter()
            .enumerate()
            .filter(|(_, stop)| stop.station_id == station_id)
            .map(|(i, _)| i)
            .collect()
    }

    /// Highest valid route-progress value.
    pub fn last_index(&self) -> usize {
        self.stops.len().saturating_sub(1)
    }
}

/// One immutable revision of the whole dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub revision: i64,
    pub generated_at: DateTime<Utc>,
    pub stations: Vec<Station>,
    pub trains: Vec<Train>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            revision: 0,
            generated_at: Utc::now(),
            stations: Vec::new(),
            trains: Vec::new(),
        }
    }

    pub fn station(&self, id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn train(&self, id: &str) -> Option<&Train> {
        self.trains.iter().find(|t| t.id == id)
    }

    /// Case-insensitive lookup by station id.
    pub fn find_station_ci(&self, id: &str) -> Option<&Station> {
        let needle = id.trim();
        self.stations
            .iter()
            .find(|s| s.id.eq_ignore_ascii_case(needle))
    }
}

/// Revision information for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub revision: i64,
    pub generated_at: DateTime<Utc>,
}

/// Snapshot plus whether the caller's revision was already current.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub up_to_date: bool,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}
