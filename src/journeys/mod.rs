//! Journey lookup over the current snapshot: direct trains, two-train
//! connections and trains through nearby stations.
//!
//! Only regular stops count as places to board or alight.

use chrono::{NaiveTime, Timelike};
use geo::{HaversineDistance, Point};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{Snapshot, Station, StopKind, Train};

/// At most this many connections are returned per station pair.
pub const MAX_CONNECTIONS: usize = 5;

/// Share of the direct distance within which stations count as nearby.
pub const NEARBY_RADIUS_SHARE: f64 = 0.15;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// One ride on one train.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    pub train_id: String,
    pub train_name: String,
    pub board_index: usize,
    pub alight_index: usize,
    #[serde(with = "crate::timetable::hhmm")]
    pub departure: Option<NaiveTime>,
    #[serde(with = "crate::timetable::hhmm")]
    pub arrival: Option<NaiveTime>,
}

/// Two legs joined at an interchange station.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub first: Leg,
    pub second: Leg,
    pub interchange_station_id: String,
    pub interchange_station_name: String,
    pub wait_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyPlan {
    pub from: Station,
    pub to: Station,
    pub direct: Vec<Leg>,
    pub connections: Vec<Connection>,
}

/// A train that serves stations close to both ends of a journey.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NearbyAlternative {
    #[serde(flatten)]
    pub leg: Leg,
    pub board_station_id: String,
    pub alight_station_id: String,
    /// Distance from the requested origin to the boarding station.
    pub board_detour_km: f64,
    /// Distance from the alighting station to the requested destination.
    pub alight_detour_km: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyPlan {
    pub from: Station,
    pub to: Station,
    pub search_radius_km: f64,
    pub alternatives: Vec<NearbyAlternative>,
}

/// Resolve both stations (case-insensitively) and list every way between them.
pub fn plan(snapshot: &Snapshot, from: &str, to: &str) -> Result<JourneyPlan, AppError> {
    let from = resolve(snapshot, from)?;
    let to = resolve(snapshot, to)?;
    if from.id == to.id {
        return Err(AppError::Validation(
            "Origin and destination must differ".to_string(),
        ));
    }

    Ok(JourneyPlan {
        direct: direct_trains(snapshot, &from.id, &to.id),
        connections: two_train_routes(snapshot, &from.id, &to.id),
        from: from.clone(),
        to: to.clone(),
    })
}

/// Trains without a direct ride that still run from near `from` to near
/// `to`. "Near" is within [`NEARBY_RADIUS_SHARE`] of the direct distance.
pub fn nearby(snapshot: &Snapshot, from: &str, to: &str) -> Result<NearbyPlan, AppError> {
    let from = resolve(snapshot, from)?;
    let to = resolve(snapshot, to)?;
    if from.id == to.id {
        return Err(AppError::Validation(
            "Origin and destination must differ".to_string(),
        ));
    }
    if !from.location.is_known() || !to.location.is_known() {
        return Err(AppError::Validation(format!(
            "Coordinates of {} or {} are not available",
            from.id, to.id
        )));
    }

    let radius = km_between(from, to) * NEARBY_RADIUS_SHARE;
    let near_from = stations_near(snapshot, from, radius);
    let near_to = stations_near(snapshot, to, radius);

    let mut alternatives = Vec::new();
    for train in &snapshot.trains {
        if ride(train, &from.id, &to.id).is_some() {
            continue;
        }
        let best = near_from
            .iter()
            .flat_map(|&(board, board_km)| {
                near_to.iter().filter_map(move |&(alight, alight_km)| {
                    ride(train, board, alight).map(|leg| (leg, board, board_km, alight, alight_km))
                })
            })
            .min_by(|a, b| (a.2 + a.4).total_cmp(&(b.2 + b.4)));

        if let Some((leg, board, board_km, alight, alight_km)) = best {
            alternatives.push(NearbyAlternative {
                leg,
                board_station_id: board.to_string(),
                alight_station_id: alight.to_string(),
                board_detour_km: board_km,
                alight_detour_km: alight_km,
            });
        }
    }
    alternatives.sort_by(|a, b| {
        (a.board_detour_km + a.alight_detour_km)
            .total_cmp(&(b.board_detour_km + b.alight_detour_km))
    });

    Ok(NearbyPlan {
        from: from.clone(),
        to: to.clone(),
        search_radius_km: radius,
        alternatives,
    })
}

/// Located stations within `radius_km` of `origin`, with their distances.
fn stations_near<'a>(
    snapshot: &'a Snapshot,
    origin: &Station,
    radius_km: f64,
) -> Vec<(&'a str, f64)> {
    snapshot
        .stations
        .iter()
        .filter(|s| s.location.is_known())
        .map(|s| (s.id.as_str(), km_between(origin, s)))
        .filter(|&(_, km)| km <= radius_km)
        .collect()
}

fn km_between(a: &Station, b: &Station) -> f64 {
    let a = Point::new(a.location.lon, a.location.lat);
    let b = Point::new(b.location.lon, b.location.lat);
    a.haversine_distance(&b) / 1000.0
}

fn resolve<'a>(snapshot: &'a Snapshot, id: &str) -> Result<&'a Station, AppError> {
    snapshot
        .find_station_ci(id)
        .ok_or_else(|| AppError::NotFound(format!("Station {} not found", id.trim())))
}

fn regular_stops<'a>(train: &'a Train, station_id: &'a str) -> impl Iterator<Item = usize> + 'a {
    train
        .stops
        .iter()
        .enumerate()
        .filter(move |(_, s)| s.stop_kind == StopKind::RegularStop && s.station_id == station_id)
        .map(|(i, _)| i)
}

/// The earliest ride on `train` from `from` to a later `to`.
fn ride(train: &Train, from: &str, to: &str) -> Option<Leg> {
    regular_stops(train, from).find_map(|board| {
        regular_stops(train, to)
            .find(|&alight| alight > board)
            .map(|alight| Leg {
                train_id: train.id.clone(),
                train_name: train.name.clone(),
                board_index: board,
                alight_index: alight,
                departure: train.stops[board].scheduled_time,
                arrival: train.stops[alight].scheduled_time,
            })
    })
}

/// Trains that carry a rider from `from` to `to` without changing.
pub fn direct_trains(snapshot: &Snapshot, from: &str, to: &str) -> Vec<Leg> {
    snapshot
        .trains
        .iter()
        .filter_map(|train| ride(train, from, to))
        .collect()
}

/// Minutes from `arrival` to `departure`, wrapping past midnight.
fn wait_minutes(arrival: NaiveTime, departure: NaiveTime) -> i64 {
    let minutes = |t: NaiveTime| (t.hour() * 60 + t.minute()) as i64;
    (minutes(departure) - minutes(arrival)).rem_euclid(MINUTES_PER_DAY)
}

/// Pairs of trains joined at the interchange with the longest wait.
///
/// A pair is skipped when either train alone already serves the journey.
pub fn two_train_routes(snapshot: &Snapshot, from: &str, to: &str) -> Vec<Connection> {
    let mut connections = Vec::new();

    for first in &snapshot.trains {
        if ride(first, from, to).is_some() {
            continue;
        }
        for second in &snapshot.trains {
            if first.id == second.id || ride(second, from, to).is_some() {
                continue;
            }
            if let Some(connection) = best_interchange(snapshot, first, second, from, to) {
                connections.push(connection);
                if connections.len() == MAX_CONNECTIONS {
                    return connections;
                }
            }
        }
    }
    connections
}

fn best_interchange(
    snapshot: &Snapshot,
    first: &Train,
    second: &Train,
    from: &str,
    to: &str,
) -> Option<Connection> {
    let mut best: Option<Connection> = None;

    for board in regular_stops(first, from) {
        for (change_at, stop) in first.stops.iter().enumerate().skip(board + 1) {
            if stop.stop_kind != StopKind::RegularStop
                || stop.station_id == from
                || stop.station_id == to
            {
                continue;
            }
            let Some(first_leg) = ride(first, from, &stop.station_id)
                .filter(|leg| leg.board_index == board && leg.alight_index == change_at)
            else {
                continue;
            };
            let Some(second_leg) = ride(second, &stop.station_id, to) else {
                continue;
            };
            let (Some(arrival), Some(departure)) = (first_leg.arrival, second_leg.departure) else {
                continue;
            };

            let wait = wait_minutes(arrival, departure);
            if best.as_ref().map_or(true, |b| wait > b.wait_minutes) {
                let name = snapshot
                    .station(&stop.station_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| stop.station_id.clone());
                best = Some(Connection {
                    first: first_leg,
                    second: second_leg,
                    interchange_station_id: stop.station_id.clone(),
                    interchange_station_name: name,
                    wait_minutes: wait,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::sample_snapshot;

    #[test]
    fn test_direct_trains_respect_direction() {
        let snapshot = sample_snapshot();

        let southbound: Vec<_> = direct_trains(&snapshot, "DHK", "CTG")
            .into_iter()
            .map(|leg| leg.train_id)
            .collect();
        assert_eq!(southbound, vec!["109", "721"]);

        let northbound: Vec<_> = direct_trains(&snapshot, "CTG", "DHK")
            .into_iter()
            .map(|leg| leg.train_id)
            .collect();
        assert_eq!(northbound, vec!["790"]);
    }

    #[test]
    fn test_pass_through_is_not_a_stop() {
        let snapshot = sample_snapshot();
        // 721 only passes through Laksam.
        assert!(direct_trains(&snapshot, "DHK", "LKS").is_empty());
    }

    #[test]
    fn test_two_train_route_via_interchange() {
        let snapshot = sample_snapshot();
        let connections = two_train_routes(&snapshot, "DHK", "SYL");

        assert_eq!(connections.len(), 1);
        let connection = &connections[0];
        assert_eq!(connection.first.train_id, "721");
        assert_eq!(connection.second.train_id, "717");
        assert_eq!(connection.interchange_station_id, "AKH");
        assert_eq!(connection.wait_minutes, 60);
    }

    #[test]
    fn test_wait_wraps_past_midnight() {
        let arrival = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        let departure = NaiveTime::from_hms_opt(0, 15, 0).unwrap();
        assert_eq!(wait_minutes(arrival, departure), 45);
    }

    #[test]
    fn test_plan_resolves_ids_case_insensitively() {
        let snapshot = sample_snapshot();
        let plan = plan(&snapshot, "dhk", " syl ").unwrap();
        assert_eq!(plan.from.id, "DHK");
        assert_eq!(plan.to.id, "SYL");
        assert!(plan.direct.is_empty());
        assert_eq!(plan.connections.len(), 1);
    }

    #[test]
    fn test_plan_unknown_station() {
        let snapshot = sample_snapshot();
        assert!(matches!(
            plan(&snapshot, "DHK", "XYZ"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_nearby_finds_train_from_neighbouring_station() {
        let snapshot = sample_snapshot();
        // 721 runs from the airport directly; 109 only from Kamalapur nearby.
        let plan = nearby(&snapshot, "APT", "CTG").unwrap();

        assert_eq!(plan.alternatives.len(), 1);
        let alternative = &plan.alternatives[0];
        assert_eq!(alternative.leg.train_id, "109");
        assert_eq!(alternative.board_station_id, "DHK");
        assert_eq!(alternative.alight_station_id, "CTG");
        assert!(alternative.board_detour_km > 10.0 && alternative.board_detour_km < 20.0);
        assert_eq!(alternative.alight_detour_km, 0.0);
    }

    #[test]
    fn test_nearby_needs_coordinates() {
        let snapshot = sample_snapshot();
        assert!(matches!(
            nearby(&snapshot, "DHK", "LKS"),
            Err(AppError::Validation(_))
        ));
    }
}
