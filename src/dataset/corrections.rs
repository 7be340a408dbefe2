//! Applying an accepted correction to a snapshot.
//!
//! Pure functions: the current snapshot is never touched, a fresh one is built.

use chrono::{DateTime, Utc};

use super::validate::validate_snapshot;
use crate::errors::AppError;
use crate::models::{ProposedChange, Snapshot, Train};

/// Build revision `current.revision + 1` with `change` applied.
pub fn apply_change(
    current: &Snapshot,
    change: &ProposedChange,
    now: DateTime<Utc>,
) -> Result<Snapshot, AppError> {
    let revision = current.revision + 1;
    let mut next = current.clone();
    next.revision = revision;
    next.generated_at = now;

    match change {
        ProposedChange::AddStation { station } => {
            if current.station(&station.id).is_some() {
                return Err(AppError::Validation(format!(
                    "Station {} already exists",
                    station.id
                )));
            }
            next.stations.push(station.clone());
        }
        ProposedChange::UpdateStation {
            station_id,
            name,
            location,
        } => {
            if name.is_none() && location.is_none() {
                return Err(AppError::Validation("Nothing to update".to_string()));
            }
            let station = next
                .stations
                .iter_mut()
                .find(|s| &s.id == station_id)
                .ok_or_else(|| AppError::Validation(format!("Unknown station {}", station_id)))?;
            if let Some(name) = name {
                station.name = name.clone();
            }
            if let Some(location) = location {
                station.location = *location;
            }
        }
        ProposedChange::AddTrain {
            id,
            name,
            stops,
            off_days,
        } => {
            if current.train(id).is_some() {
                return Err(AppError::Validation(format!("Train {} already exists", id)));
            }
            next.trains.push(Train {
                id: id.clone(),
                name: name.clone(),
                stops: stops.clone(),
                route_revision: revision,
                off_days: off_days.clone(),
            });
        }
        ProposedChange::UpdateTrain {
            train_id,
            name,
            off_days,
        } => {
            if name.is_none() && off_days.is_none() {
                return Err(AppError::Validation("Nothing to update".to_string()));
            }
            let train = train_mut(&mut next, train_id)?;
            if let Some(name) = name {
                train.name = name.clone();
            }
            if let Some(off_days) = off_days {
                train.off_days = off_days.clone();
            }
        }
        ProposedChange::ReplaceStops { train_id, stops } => {
            let train = train_mut(&mut next, train_id)?;
            train.stops = stops.clone();
            train.route_revision = revision;
        }
        ProposedChange::UpdateStop {
            train_id,
            stop_index,
            stop_kind,
            scheduled_time,
        } => {
            if stop_kind.is_none() && scheduled_time.is_none() {
                return Err(AppError::Validation("Nothing to update".to_string()));
            }
            let train = train_mut(&mut next, train_id)?;
            let stop = train.stops.get_mut(*stop_index).ok_or_else(|| {
                AppError::Validation(format!(
                    "Train {} has no stop at index {}",
                    train_id, stop_index
                ))
            })?;
            if let Some(kind) = stop_kind {
                stop.stop_kind = *kind;
            }
            if let Some(time) = scheduled_time {
                stop.scheduled_time = Some(*time);
            }
        }
    }

    validate_snapshot(&next).map_err(AppError::Validation)?;
    Ok(next)
}

fn train_mut<'a>(snapshot: &'a mut Snapshot, train_id: &str) -> Result<&'a mut Train, AppError> {
    snapshot
        .trains
        .iter_mut()
        .find(|t| t.id == train_id)
        .ok_or_else(|| AppError::Validation(format!("Unknown train {}", train_id)))
}
