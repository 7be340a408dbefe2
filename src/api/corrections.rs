//! Correction proposal and moderation endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    CorrectionProposal, Decision, DecisionRequest, ProposalStatus, ProposeCorrectionRequest,
};
use crate::AppState;

/// POST /api/corrections - Submit a correction proposal.
pub async fn propose_correction(
    State(state): State<AppState>,
    Json(request): Json<ProposeCorrectionRequest>,
) -> ApiResult<CorrectionProposal> {
    let revision_id = state.store.get_revision().await;

    match state.store.propose_correction(request).await {
        Ok(proposal) => success(proposal, revision_id),
        Err(e) => error(e, revision_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// GET /api/moderation/corrections - List proposals, optionally by status.
pub async fn list_proposals(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Vec<CorrectionProposal>> {
    let revision_id = state.store.get_revision().await;

    let status = match params.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match ProposalStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return error(
                    AppError::BadRequest(format!("Unknown proposal status '{}'", raw)),
                    revision_id,
                )
            }
        },
    };

    match state.store.list_proposals(status).await {
        Ok(proposals) => success(proposals, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/moderation/corrections/:id - Get a single proposal.
pub async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CorrectionProposal> {
    let revision_id = state.store.get_revision().await;

    match state.store.get_proposal(&id).await {
        Ok(proposal) => success(proposal, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/moderation/corrections/:id/decision - Accept or reject.
pub async fn decide_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<CorrectionProposal> {
    let revision_id = state.store.get_revision().await;

    match state.store.apply_correction(&id, request.decision).await {
        Ok(proposal) => {
            if request.decision == Decision::Accepted {
                rebuild_search_index(&state).await;
            }
            let new_revision = state.store.get_revision().await;
            success(proposal, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// Re-index stations from the current snapshot. An older revision never
/// replaces a newer one; failures only degrade search.
async fn rebuild_search_index(state: &AppState) {
    let snapshot = state.store.current().await;
    if let Err(e) = state
        .search
        .rebuild(snapshot.revision, &snapshot.stations)
        .await
    {
        tracing::warn!(
            "Failed to rebuild search index for revision {}: {}",
            snapshot.revision,
            e
        );
    }
}
