//! Structural invariants every published snapshot must satisfy.

use std::collections::HashSet;

use crate::models::{Snapshot, Train};
use crate::timetable;

/// Check a whole snapshot. Returns the first violation found.
pub fn validate_snapshot(snapshot: &Snapshot) -> Result<(), String> {
    let mut station_ids = HashSet::new();
    for station in &snapshot.stations {
        if station.id.trim().is_empty() {
            return Err("station with empty id".to_string());
        }
        if station.name.trim().is_empty() {
            return Err(format!("station {} has an empty name", station.id));
        }
        if !station.location.is_valid() {
            return Err(format!("station {} has an invalid location", station.id));
        }
        if !station_ids.insert(station.id.as_str()) {
            return Err(format!("duplicate station id {}", station.id));
        }
    }

    let mut train_ids = HashSet::new();
    for train in &snapshot.trains {
        if !train_ids.insert(train.id.as_str()) {
            return Err(format!("duplicate train id {}", train.id));
        }
        validate_train(train, &station_ids)?;
        if train.route_revision > snapshot.revision {
            return Err(format!(
                "train {} has route revision {} beyond snapshot revision {}",
                train.id, train.route_revision, snapshot.revision
            ));
        }
    }

    Ok(())
}

fn validate_train(train: &Train, station_ids: &HashSet<&str>) -> Result<(), String> {
    if train.id.trim().is_empty() {
        return Err("train with empty id".to_string());
    }
    if train.name.trim().is_empty() {
        return Err(format!("train {} has an empty name", train.id));
    }
    if train.stops.is_empty() {
        return Err(format!("train {} has no stops", train.id));
    }
    for (index, stop) in train.stops.iter().enumerate() {
        if !station_ids.contains(stop.station_id.as_str()) {
            return Err(format!(
                "train {} stop {} references unknown station {}",
                train.id, index, stop.station_id
            ));
        }
    }
    timetable::check_schedule(&train.stops).map_err(|e| format!("train {}: {}", train.id, e))
}
