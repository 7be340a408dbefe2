//! Report intake: validates rider reports before they reach the estimator.
//!
//! Rejected reports have no side effect; they are only logged and returned
//! to the caller with a reason code.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dataset::DatasetStore;
use crate::errors::AppError;
use crate::estimator::{Estimator, RouteGeometry};
use crate::models::{
    epoch_to_datetime, ClaimedPosition, GeoPoint, PositionEstimate, Report, SubmitReportRequest,
    Train,
};
use crate::timetable;

/// Longest accepted reporter token.
const MAX_TOKEN_LEN: usize = 128;

/// Snapshot re-reads allowed when a correction lands mid-report.
const MAX_ROUTE_RETRIES: usize = 3;

pub struct ReportIntake {
    store: Arc<DatasetStore>,
    estimator: Arc<Estimator>,
}

impl ReportIntake {
    pub fn new(store: Arc<DatasetStore>, estimator: Arc<Estimator>) -> Self {
        Self { store, estimator }
    }

    /// Validate and record a report, returning the train's updated estimate.
    pub async fn submit(
        &self,
        request: SubmitReportRequest,
    ) -> Result<Option<PositionEstimate>, AppError> {
        self.submit_at(request, Utc::now()).await
    }

    pub async fn submit_at(
        &self,
        request: SubmitReportRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<PositionEstimate>, AppError> {
        let train_id = request.train_id.trim().to_string();
        match self.accept(request, &train_id, now).await {
            Ok(estimate) => Ok(estimate),
            Err(err) => {
                tracing::debug!("Rejected report for train {}: {}", train_id, err);
                Err(err)
            }
        }
    }

    async fn accept(
        &self,
        request: SubmitReportRequest,
        train_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PositionEstimate>, AppError> {
        check_structure(&request, train_id)?;

        for _ in 0..MAX_ROUTE_RETRIES {
            let snapshot = self.store.current().await;
            let train = snapshot
                .train(train_id)
                .ok_or_else(|| AppError::UnknownTrain(format!("Unknown train {}", train_id)))?;

            let submitted_at = self.check_timestamp(request.submitted_at, now)?;
            let route = RouteGeometry::new(train, &snapshot);
            let claimed_position = self.check_route(request.position.clone(), train, &route)?;
            self.check_schedule(&claimed_position, train, &route, submitted_at)?;

            let report = Report {
                train_id: train.id.clone(),
                reporter_token: request.reporter_token.trim().to_string(),
                submitted_at,
                claimed_position,
            };
            match self.estimator.record(report, train, &snapshot, now).await {
                Ok(estimate) => return Ok(estimate),
                Err(stale) => tracing::debug!(
                    "Train {} moved to route revision {} mid-report, retrying",
                    train_id,
                    stale.current_revision
                ),
            }
        }

        Err(AppError::invariant(format!(
            "Estimator follows a route of train {} newer than the dataset",
            train_id
        )))
    }

    fn check_timestamp(&self, raw: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
        let config = self.estimator.config();
        let submitted_at = epoch_to_datetime(raw).ok_or_else(|| {
            AppError::StaleTimestamp(format!("Timestamp {} is not a valid instant", raw))
        })?;

        if submitted_at > now + config.clock_skew {
            return Err(AppError::StaleTimestamp(
                "Report is timestamped in the future".to_string(),
            ));
        }
        if submitted_at < now - config.horizon {
            return Err(AppError::StaleTimestamp(format!(
                "Report is older than {} seconds",
                config.horizon.num_seconds()
            )));
        }
        Ok(submitted_at)
    }

    /// Refuse claims that put a running train well ahead of its timetable.
    fn check_schedule(
        &self,
        position: &ClaimedPosition,
        train: &Train,
        route: &RouteGeometry,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let config = self.estimator.config();
        let Some(ceiling) =
            timetable::scheduled_ceiling(train, submitted_at, config.timetable_offset)
        else {
            return Ok(());
        };

        let earliest = match position {
            ClaimedPosition::Station { station_id } => {
                train.stop_indices(station_id).first().map(|&i| i as f64)
            }
            ClaimedPosition::Coordinate { lat, lon } => route
                .project(GeoPoint::new(*lat, *lon), None)
                .map(|p| p.progress),
            ClaimedPosition::Progress { value } => Some(*value),
        };

        match earliest {
            Some(progress) if progress > ceiling + config.ahead_of_schedule_tolerance => {
                Err(AppError::InconsistentRoute(format!(
                    "Train {} is scheduled at stop {:.1}, not {:.1}",
                    train.id, ceiling, progress
                )))
            }
            _ => Ok(()),
        }
    }

    /// Check the claim against the train's route, canonicalizing station ids.
    fn check_route(
        &self,
        position: ClaimedPosition,
        train: &Train,
        route: &RouteGeometry,
    ) -> Result<ClaimedPosition, AppError> {
        match position {
            ClaimedPosition::Station { station_id } => {
                let needle = station_id.trim();
                let stop = train
                    .stops
                    .iter()
                    .find(|s| s.station_id.eq_ignore_ascii_case(needle))
                    .ok_or_else(|| {
                        AppError::InconsistentRoute(format!(
                            "Station {} is not on the route of train {}",
                            needle, train.id
                        ))
                    })?;
                Ok(ClaimedPosition::Station {
                    station_id: stop.station_id.clone(),
                })
            }
            ClaimedPosition::Coordinate { lat, lon } => {
                if route.is_empty() {
                    return Err(AppError::InconsistentRoute(format!(
                        "Train {} has no located stops to match a coordinate against",
                        train.id
                    )));
                }
                let max_km = self.estimator.config().max_off_route_km;
                let projection = route.project(GeoPoint::new(lat, lon), None).ok_or_else(|| {
                    AppError::invariant(format!("Route of train {} failed to project", train.id))
                })?;
                if projection.off_route_km > max_km {
                    return Err(AppError::InconsistentRoute(format!(
                        "Coordinate is {:.1} km from the route of train {}",
                        projection.off_route_km, train.id
                    )));
                }
                Ok(ClaimedPosition::Coordinate { lat, lon })
            }
            ClaimedPosition::Progress { value } => {
                if value > train.last_index() as f64 {
                    return Err(AppError::Validation(format!(
                        "Progress {} is beyond the last stop of train {}",
                        value, train.id
                    )));
                }
                Ok(ClaimedPosition::Progress { value })
            }
        }
    }
}

/// Checks that need no dataset.
fn check_structure(request: &SubmitReportRequest, train_id: &str) -> Result<(), AppError> {
    if train_id.is_empty() {
        return Err(AppError::Validation("Train id is required".to_string()));
    }
    let token = request.reporter_token.trim();
    if token.is_empty() {
        return Err(AppError::Validation(
            "Reporter token is required".to_string(),
        ));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(AppError::Validation(format!(
            "Reporter token must be at most {} bytes",
            MAX_TOKEN_LEN
        )));
    }

    match &request.position {
        ClaimedPosition::Station { station_id } if station_id.trim().is_empty() => Err(
            AppError::Validation("Station id is required".to_string()),
        ),
        ClaimedPosition::Coordinate { lat, lon } if !GeoPoint::new(*lat, *lon).is_valid() => {
            Err(AppError::Validation(format!(
                "Coordinate ({}, {}) is out of range",
                lat, lon
            )))
        }
        ClaimedPosition::Progress { value } if !value.is_finite() || *value < 0.0 => Err(
            AppError::Validation(format!("Progress {} must be a non-negative number", value)),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstimatorConfig;
    use crate::db::{init_database, Repository};
    use chrono::{Duration, FixedOffset, TimeZone};
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Harness {
        intake: ReportIntake,
        estimator: Arc<Estimator>,
        _dir: TempDir,
    }

    /// Wall-clock independent: no timetable ceiling.
    fn untimed() -> EstimatorConfig {
        EstimatorConfig {
            ahead_of_schedule_tolerance: f64::INFINITY,
            ..EstimatorConfig::default()
        }
    }

    async fn harness() -> Harness {
        harness_with(untimed()).await
    }

    async fn harness_with(config: EstimatorConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        let dataset = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/dataset.json");
        let store = Arc::new(
            DatasetStore::open(Repository::new(pool), &dataset)
                .await
                .unwrap(),
        );
        let estimator = Arc::new(Estimator::new(config));
        Harness {
            intake: ReportIntake::new(store, estimator.clone()),
            estimator,
            _dir: dir,
        }
    }

    fn request(train: &str, at: DateTime<Utc>, position: ClaimedPosition) -> SubmitReportRequest {
        SubmitReportRequest {
            train_id: train.to_string(),
            reporter_token: "rider-1".to_string(),
            submitted_at: at.timestamp(),
            position,
        }
    }

    fn station(id: &str) -> ClaimedPosition {
        ClaimedPosition::Station {
            station_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_accepted_report_produces_estimate() {
        let h = harness().await;
        let now = Utc::now();

        let estimate = h
            .intake
            .submit_at(request("109", now, station("cml")), now)
            .await
            .unwrap()
            .unwrap();
        assert!((estimate.route_progress - 1.0).abs() < 1e-9);
        assert_eq!(estimate.nearest_station_id, "CML");
    }

    #[tokio::test]
    async fn test_unknown_train_is_checked_first() {
        let h = harness().await;
        let now = Utc::now();

        // Also stale and off-route, but the train check wins.
        let err = h
            .intake
            .submit_at(
                request("999", now - Duration::hours(2), station("SYL")),
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownTrain(_)));
    }

    #[tokio::test]
    async fn test_timestamp_window() {
        let h = harness().await;
        let now = Utc::now();

        let future = h
            .intake
            .submit_at(request("109", now + Duration::minutes(5), station("CML")), now)
            .await
            .unwrap_err();
        assert!(matches!(future, AppError::StaleTimestamp(_)));

        let stale = h
            .intake
            .submit_at(request("109", now - Duration::minutes(11), station("CML")), now)
            .await
            .unwrap_err();
        assert!(matches!(stale, AppError::StaleTimestamp(_)));

        let mut millis = request("109", now, station("CML"));
        millis.submitted_at = now.timestamp_millis();
        assert!(h.intake.submit_at(millis, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_station_off_route_is_rejected_without_effect() {
        let h = harness().await;
        let now = Utc::now();

        let err = h
            .intake
            .submit_at(request("109", now, station("SYL")), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InconsistentRoute(_)));
        assert!(h.estimator.get_estimate("109", now).await.is_none());
    }

    #[tokio::test]
    async fn test_coordinate_far_from_route_is_rejected() {
        let h = harness().await;
        let now = Utc::now();

        let sylhet = ClaimedPosition::Coordinate {
            lat: 24.8949,
            lon: 91.8687,
        };
        let err = h
            .intake
            .submit_at(request("109", now, sylhet), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InconsistentRoute(_)));

        let comilla = ClaimedPosition::Coordinate {
            lat: 23.4619,
            lon: 91.1850,
        };
        let estimate = h
            .intake
            .submit_at(request("109", now, comilla), now)
            .await
            .unwrap()
            .unwrap();
        assert!(estimate.coordinate.is_some());
    }

    #[tokio::test]
    async fn test_malformed_reports_are_validation_errors() {
        let h = harness().await;
        let now = Utc::now();

        let mut blank = request("109", now, station("CML"));
        blank.reporter_token = " ".to_string();
        assert!(matches!(
            h.intake.submit_at(blank, now).await,
            Err(AppError::Validation(_))
        ));

        let bad_coordinate = ClaimedPosition::Coordinate {
            lat: 123.0,
            lon: 90.0,
        };
        assert!(matches!(
            h.intake
                .submit_at(request("109", now, bad_coordinate), now)
                .await,
            Err(AppError::Validation(_))
        ));

        let past_end = ClaimedPosition::Progress { value: 2.5 };
        assert!(matches!(
            h.intake.submit_at(request("109", now, past_end), now).await,
            Err(AppError::Validation(_))
        ));
    }

    fn dhaka(h: u32, m: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(6 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_report_ahead_of_timetable_is_rejected() {
        let h = harness_with(EstimatorConfig::default()).await;
        // 109 is due at Comilla (stop 1) at 10:30.
        let now = dhaka(10, 30);

        let err = h
            .intake
            .submit_at(request("109", now, station("CTG")), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InconsistentRoute(_)));

        let estimate = h
            .intake
            .submit_at(request("109", now, station("CML")), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(estimate.nearest_station_id, "CML");

        // Outside the service window there is no ceiling.
        let night = dhaka(23, 0);
        let mut late = request("109", night, station("CTG"));
        late.reporter_token = "rider-2".to_string();
        assert!(h.intake.submit_at(late, night).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_snapshot_never_rewinds_track() {
        let h = harness().await;
        let now = Utc::now();

        // The track already follows a route newer than anything the store has.
        let mut newer = (*h.intake.store.current().await).clone();
        newer.revision = 2;
        let train = newer.trains.iter_mut().find(|t| t.id == "109").unwrap();
        train.route_revision = 2;
        let train = train.clone();
        let report = Report {
            train_id: "109".to_string(),
            reporter_token: "rider-0".to_string(),
            submitted_at: now,
            claimed_position: station("CTG"),
        };
        h.estimator.record(report, &train, &newer, now).await.unwrap();

        let err = h
            .intake
            .submit_at(request("109", now, station("CML")), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let estimate = h.estimator.get_estimate("109", now).await.unwrap();
        assert_eq!(estimate.route_revision, 2);
        assert_eq!(estimate.supporting_report_count, 1);
    }
}
