//! Dataset API endpoints.

use axum::extract::{Query, State};
use serde::Deserialize;

use super::{success, ApiResult};
use crate::models::{RevisionInfo, SnapshotResponse};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    /// Revision the client already holds.
    pub revision: Option<i64>,
}

/// GET /api/dataset - Get the full current snapshot.
pub async fn get_dataset(
    State(state): State<AppState>,
    Query(params): Query<SnapshotQuery>,
) -> ApiResult<SnapshotResponse> {
    let response = state.store.get_snapshot(params.revision).await;
    let revision_id = response.snapshot.revision;
    success(response, revision_id)
}

/// GET /api/dataset/revision - Get the current revision info.
pub async fn get_revision(State(state): State<AppState>) -> ApiResult<RevisionInfo> {
    let revision_info = state.store.get_revision_info().await;
    let revision_id = revision_info.revision;
    success(revision_info, revision_id)
}
