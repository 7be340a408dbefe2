//! Station search and journey endpoints.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::journeys::{self, JourneyPlan, NearbyPlan};
use crate::models::Station;
use crate::AppState;

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    /// Maximum number of results (default: 20).
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<StationHit>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationHit {
    pub station: Station,
    pub score: f32,
}

/// Maximum number of search results allowed.
const MAX_SEARCH_LIMIT: usize = 100;

/// GET /api/stations/search - Search stations by name or id.
pub async fn search_stations(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    let snapshot = state.store.current().await;
    let revision_id = snapshot.revision;

    let limit = params.limit.min(MAX_SEARCH_LIMIT);
    let hits = match state.search.search(&params.q, limit, params.offset) {
        Ok(hits) => hits,
        Err(e) => return error(e, revision_id),
    };

    // The index can briefly lag a new revision; drop ids it no longer knows.
    let results: Vec<StationHit> = hits
        .into_iter()
        .filter_map(|hit| {
            snapshot.station(&hit.station_id).map(|station| StationHit {
                station: station.clone(),
                score: hit.score,
            })
        })
        .collect();

    success(
        SearchResponse {
            total: results.len(),
            results,
            limit,
            offset: params.offset,
        },
        revision_id,
    )
}

#[derive(Debug, Deserialize)]
pub struct JourneyQuery {
    pub from: String,
    pub to: String,
}

/// GET /api/journeys - Direct trains and two-train connections.
pub async fn get_journeys(
    State(state): State<AppState>,
    Query(params): Query<JourneyQuery>,
) -> ApiResult<JourneyPlan> {
    let snapshot = state.store.current().await;
    match journeys::plan(&snapshot, &params.from, &params.to) {
        Ok(plan) => success(plan, snapshot.revision),
        Err(e) => error(e, snapshot.revision),
    }
}

/// GET /api/journeys/nearby - Trains through stations near both ends.
pub async fn get_nearby_journeys(
    State(state): State<AppState>,
    Query(params): Query<JourneyQuery>,
) -> ApiResult<NearbyPlan> {
    let snapshot = state.store.current().await;
    match journeys::nearby(&snapshot, &params.from, &params.to) {
        Ok(plan) => success(plan, snapshot.revision),
        Err(e) => error(e, snapshot.revision),
    }
}
