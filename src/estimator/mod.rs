//! Per-train streaming position estimator.
//!
//! Each tracked train owns a bounded, time-ordered window of accepted
//! reports. Every accepted report and every sweep recomputes the train's
//! estimate; reads only return what was last computed.

mod consensus;
mod route;

pub use route::RouteGeometry;

use consensus::{consensus, recency_weight, Gates, Sample};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config::EstimatorConfig;
use crate::models::{
    ClaimedPosition, EstimateStatus, GeoPoint, PositionEstimate, Report, Snapshot, Train,
};
use crate::timetable;

/// Window and last estimate for one train.
struct TrainTrack {
    route_revision: i64,
    reports: VecDeque<Report>,
    estimate: Option<PositionEstimate>,
    /// Set when the sweep drops the track; writers holding a stale handle retry.
    retired: bool,
}

impl TrainTrack {
    fn new(route_revision: i64) -> Self {
        Self {
            route_revision,
            reports: VecDeque::new(),
            estimate: None,
            retired: false,
        }
    }

    fn reset(&mut self, route_revision: i64) {
        self.route_revision = route_revision;
        self.reports.clear();
        self.estimate = None;
    }

    /// Insert keeping time order; one report per reporter token.
    /// Returns false if a newer report from the same token is already held.
    fn insert(&mut self, report: Report) -> bool {
        if let Some(pos) = self
            .reports
            .iter()
            .position(|r| r.reporter_token == report.reporter_token)
        {
            if self.reports[pos].submitted_at > report.submitted_at {
                return false;
            }
            self.reports.remove(pos);
        }

        let at = self
            .reports
            .iter()
            .rposition(|r| r.submitted_at <= report.submitted_at)
            .map_or(0, |i| i + 1);
        self.reports.insert(at, report);
        true
    }
}

/// The caller's train is older than the route the track already follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleRoute {
    pub current_revision: i64,
}

/// Outcome of one eviction sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub tracked: usize,
    pub dropped: usize,
}

pub struct Estimator {
    config: EstimatorConfig,
    tracks: RwLock<HashMap<String, Arc<RwLock<TrainTrack>>>>,
}

impl Estimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            tracks: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    async fn track_for(&self, train: &Train) -> Arc<RwLock<TrainTrack>> {
        if let Some(track) = self.tracks.read().await.get(&train.id) {
            return track.clone();
        }
        self.tracks
            .write()
            .await
            .entry(train.id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(TrainTrack::new(train.route_revision))))
            .clone()
    }

    /// Add an accepted report to its train's window and recompute.
    ///
    /// `train` must come from the caller's snapshot. A track never moves back
    /// to an older route: if `train` predates it the report is refused with
    /// [`StaleRoute`] and the caller should retry against a fresh snapshot.
    pub async fn record(
        &self,
        report: Report,
        train: &Train,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<PositionEstimate>, StaleRoute> {
        loop {
            let track = self.track_for(train).await;
            let mut track = track.write().await;
            if track.retired {
                continue;
            }

            if train.route_revision < track.route_revision {
                return Err(StaleRoute {
                    current_revision: track.route_revision,
                });
            }
            if train.route_revision > track.route_revision {
                tracing::info!(
                    "Route of train {} changed (revision {} -> {}), resetting its window",
                    train.id,
                    track.route_revision,
                    train.route_revision
                );
                track.reset(train.route_revision);
            }

            if !track.insert(report.clone()) {
                tracing::debug!(
                    "Ignoring older duplicate report for train {} from the same reporter",
                    train.id
                );
            }
            self.recompute(&mut track, train, snapshot, now);
            return Ok(track.estimate.clone());
        }
    }

    /// Last computed estimate, or `None` when unknown or expired.
    pub async fn get_estimate(&self, train_id: &str, now: DateTime<Utc>) -> Option<PositionEstimate> {
        let track = self.tracks.read().await.get(train_id).cloned()?;
        let track = track.read().await;
        track.estimate.clone().filter(|e| e.is_fresh(now))
    }

    /// Batch read keyed by train id.
    pub async fn get_estimates(
        &self,
        train_ids: &[String],
        now: DateTime<Utc>,
    ) -> BTreeMap<String, Option<PositionEstimate>> {
        let mut out = BTreeMap::new();
        for id in train_ids {
            out.insert(id.clone(), self.get_estimate(id, now).await);
        }
        out
    }

    /// Every train with a fresh estimate, most recently reported first.
    pub async fn live_trains(&self, now: DateTime<Utc>) -> Vec<PositionEstimate> {
        let tracks: Vec<_> = self.tracks.read().await.values().cloned().collect();
        let mut live = Vec::new();
        for track in tracks {
            if let Some(estimate) = track.read().await.estimate.clone() {
                if estimate.is_fresh(now) {
                    live.push(estimate);
                }
            }
        }
        live.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        live
    }

    /// Evict old reports from every track and drop the ones left empty.
    pub async fn sweep(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> SweepStats {
        let mut tracks = self.tracks.write().await;
        let mut dropped = Vec::new();

        for (train_id, track) in tracks.iter() {
            let mut track = track.write().await;
            // Snapshot older than the track; the next sweep catches up.
            if track.route_revision > snapshot.revision {
                continue;
            }
            match snapshot.train(train_id) {
                Some(train) if train.route_revision > track.route_revision => {
                    track.reset(train.route_revision);
                }
                Some(train) if train.route_revision == track.route_revision => {
                    self.recompute(&mut track, train, snapshot, now);
                }
                Some(_) => continue,
                None => track.reports.clear(),
            }

            if track.reports.is_empty() {
                track.retired = true;
                dropped.push(train_id.clone());
            }
        }

        for train_id in &dropped {
            tracks.remove(train_id);
        }

        let stats = SweepStats {
            tracked: tracks.len(),
            dropped: dropped.len(),
        };
        if stats.dropped > 0 {
            tracing::debug!(
                "Sweep dropped {} idle trains, {} still tracked",
                stats.dropped,
                stats.tracked
            );
        }
        stats
    }

    fn recompute(
        &self,
        track: &mut TrainTrack,
        train: &Train,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) {
        let cutoff = now - self.config.horizon;
        while track
            .reports
            .front()
            .is_some_and(|r| r.submitted_at < cutoff)
        {
            track.reports.pop_front();
        }
        while track.reports.len() > self.config.window_size {
            track.reports.pop_front();
        }

        let Some(newest) = track.reports.back().map(|r| r.submitted_at) else {
            track.estimate = None;
            return;
        };

        let route = RouteGeometry::new(train, snapshot);
        let hint = track.estimate.as_ref().map(|e| e.route_progress);
        let half_life = self.config.half_life.num_milliseconds() as f64 / 1000.0;
        let last = train.last_index() as f64;

        let samples: Vec<Sample> = track
            .reports
            .iter()
            .filter_map(|report| {
                let progress = report_progress(report, train, &route, hint)?;
                let age = (now - report.submitted_at).num_milliseconds() as f64 / 1000.0;
                Some(Sample {
                    progress: progress.clamp(0.0, last),
                    weight: recency_weight(age, half_life),
                })
            })
            .collect();

        let gates = Gates {
            ahead: self.config.outlier_threshold,
            behind: self.config.regression_tolerance,
        };
        let Some(result) = consensus(&samples, gates, hint) else {
            track.estimate = None;
            return;
        };

        let progress = result.progress;
        let nearest = progress.round() as usize;
        let status = if result.inliers >= self.config.min_confirmations {
            EstimateStatus::Confirmed
        } else {
            EstimateStatus::Unconfirmed
        };

        track.estimate = Some(PositionEstimate {
            train_id: train.id.clone(),
            route_revision: train.route_revision,
            route_progress: progress,
            station_index: progress.floor() as usize,
            coordinate: route.coordinate_at(progress),
            nearest_station_id: train.stops[nearest.min(train.last_index())]
                .station_id
                .clone(),
            confidence: result.confidence,
            status,
            last_updated: newest,
            computed_at: now,
            expires_at: newest.min(now) + self.config.horizon,
            supporting_report_count: result.inliers,
            discarded_report_count: result.discarded + (track.reports.len() - samples.len()),
            scheduled_progress: timetable::scheduled_progress(
                train,
                now,
                self.config.timetable_offset,
            ),
        });
    }
}

/// Route progress claimed by one report.
fn report_progress(
    report: &Report,
    train: &Train,
    route: &RouteGeometry,
    hint: Option<f64>,
) -> Option<f64> {
    match &report.claimed_position {
        ClaimedPosition::Station { station_id } => {
            let indices = train.stop_indices(station_id);
            match hint {
                Some(hint) => indices.into_iter().min_by(|a, b| {
                    (*a as f64 - hint)
                        .abs()
                        .total_cmp(&(*b as f64 - hint).abs())
                }),
                None => indices.into_iter().next(),
            }
            .map(|i| i as f64)
        }
        ClaimedPosition::Coordinate { lat, lon } => route
            .project(GeoPoint::new(*lat, *lon), hint)
            .map(|p| p.progress),
        ClaimedPosition::Progress { value } => Some(*value),
    }
}
