//! Position estimate endpoints.

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::{Path, Query, State};
use chrono::Utc;
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::PositionEstimate;
use crate::AppState;

/// Maximum number of trains in one batch read.
const MAX_BATCH: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsQuery {
    /// Comma-separated train ids.
    pub train_ids: String,
}

/// GET /api/positions - Estimates for several trains; unknown ones are null.
pub async fn get_positions(
    State(state): State<AppState>,
    Query(params): Query<PositionsQuery>,
) -> ApiResult<BTreeMap<String, Option<PositionEstimate>>> {
    let revision_id = state.store.get_revision().await;

    let train_ids: Vec<String> = params
        .train_ids
        .split(',')
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if train_ids.is_empty() {
        return error(
            AppError::Validation("At least one train id is required".to_string()),
            revision_id,
        );
    }
    if train_ids.len() > MAX_BATCH {
        return error(
            AppError::Validation(format!("At most {} train ids per request", MAX_BATCH)),
            revision_id,
        );
    }

    let estimates = state.estimator.get_estimates(&train_ids, Utc::now()).await;
    success(estimates, revision_id)
}

/// GET /api/positions/:train_id - Estimate for one train, null when unknown.
pub async fn get_position(
    State(state): State<AppState>,
    Path(train_id): Path<String>,
) -> ApiResult<Option<PositionEstimate>> {
    let snapshot = state.store.current().await;
    let revision_id = snapshot.revision;

    if snapshot.train(&train_id).is_none() {
        return error(
            AppError::UnknownTrain(format!("Unknown train {}", train_id)),
            revision_id,
        );
    }

    success(
        state.estimator.get_estimate(&train_id, Utc::now()).await,
        revision_id,
    )
}

/// GET /api/live - Every train with a fresh estimate.
pub async fn get_live(State(state): State<AppState>) -> ApiResult<Vec<PositionEstimate>> {
    let revision_id = state.store.get_revision().await;
    success(state.estimator.live_trains(Utc::now()).await, revision_id)
}
