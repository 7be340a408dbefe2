//! Route geometry: the polyline through a train's located stops.
//!
//! Progress is measured in stop indices, so a point halfway between stop 2
//! and stop 3 has progress `2.5`. Stops without coordinates are skipped when
//! drawing the line but still count as indices.

use geo::{Closest, ClosestPoint, HaversineDistance, Line, Point};

use crate::models::{GeoPoint, Snapshot, Train};

/// Segments whose distance is within this of the best one are considered
/// equally close when a hint is available.
const TIE_TOLERANCE_KM: f64 = 0.25;

/// Result of snapping a coordinate onto the route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub progress: f64,
    pub off_route_km: f64,
}

pub struct RouteGeometry {
    /// `(stop index, location)` for every stop whose station has coordinates.
    located: Vec<(usize, Point<f64>)>,
}

fn to_point(p: GeoPoint) -> Point<f64> {
    Point::new(p.lon, p.lat)
}

fn km_between(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b) / 1000.0
}

impl RouteGeometry {
    pub fn new(train: &Train, snapshot: &Snapshot) -> Self {
        let located = train
            .stops
            .iter()
            .enumerate()
            .filter_map(|(index, stop)| {
                let station = snapshot.station(&stop.station_id)?;
                station
                    .location
                    .is_known()
                    .then(|| (index, to_point(station.location)))
            })
            .collect();
        Self { located }
    }

    pub fn is_empty(&self) -> bool {
        self.located.is_empty()
    }

    /// Snap `coordinate` to the nearest point of the route.
    ///
    /// When a route passes the same place twice, `hint` picks the pass whose
    /// progress is closest to it. Returns `None` if no stop has coordinates.
    pub fn project(&self, coordinate: GeoPoint, hint: Option<f64>) -> Option<Projection> {
        let point = to_point(coordinate);

        if let [(index, only)] = self.located.as_slice() {
            return Some(Projection {
                progress: *index as f64,
                off_route_km: km_between(point, *only),
            });
        }

        let candidates: Vec<Projection> = self
            .located
            .windows(2)
            .filter_map(|pair| {
                let (start_index, start) = pair[0];
                let (end_index, end) = pair[1];
                let line = Line::new(start.0, end.0);
                let snapped = match line.closest_point(&point) {
                    Closest::Intersection(p) | Closest::SinglePoint(p) => p,
                    Closest::Indeterminate => return None,
                };

                let length = km_between(start, end);
                let fraction = if length > 0.0 {
                    (km_between(start, snapped) / length).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                Some(Projection {
                    progress: start_index as f64 + fraction * (end_index - start_index) as f64,
                    off_route_km: km_between(point, snapped),
                })
            })
            .collect();

        let best = candidates
            .iter()
            .map(|c| c.off_route_km)
            .fold(f64::INFINITY, f64::min);

        let mut near = candidates
            .into_iter()
            .filter(|c| c.off_route_km <= best + TIE_TOLERANCE_KM);

        match hint {
            Some(hint) => near.min_by(|a, b| {
                (a.progress - hint)
                    .abs()
                    .total_cmp(&(b.progress - hint).abs())
            }),
            None => near.min_by(|a, b| a.off_route_km.total_cmp(&b.off_route_km)),
        }
    }

    /// Interpolated coordinate at `progress`, or `None` if no stop has
    /// coordinates.
    pub fn coordinate_at(&self, progress: f64) -> Option<GeoPoint> {
        let before = self
            .located
            .iter()
            .rev()
            .find(|(index, _)| *index as f64 <= progress);
        let after = self
            .located
            .iter()
            .find(|(index, _)| *index as f64 >= progress);

        let point = match (before, after) {
            (Some((a_index, a)), Some((b_index, b))) if a_index != b_index => {
                let t = (progress - *a_index as f64) / (*b_index - *a_index) as f64;
                Point::new(a.x() + (b.x() - a.x()) * t, a.y() + (b.y() - a.y()) * t)
            }
            (Some((_, p)), _) | (None, Some((_, p))) => *p,
            (None, None) => return None,
        };
        Some(GeoPoint::new(point.y(), point.x()))
    }
}
