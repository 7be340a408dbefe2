//! Location report endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use super::{error, success, ApiResult};
use crate::models::{PositionEstimate, SubmitReportRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAccepted {
    pub accepted: bool,
    pub estimate: Option<PositionEstimate>,
}

/// POST /api/reports - Submit a rider's location report.
pub async fn submit_report(
    State(state): State<AppState>,
    Json(request): Json<SubmitReportRequest>,
) -> ApiResult<ReportAccepted> {
    let revision_id = state.store.get_revision().await;

    match state.intake.submit(request).await {
        Ok(estimate) => success(
            ReportAccepted {
                accepted: true,
                estimate,
            },
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}
