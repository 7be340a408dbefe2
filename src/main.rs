//! Find My Train Backend
//!
//! Estimates live train positions from crowdsourced rider reports and serves
//! the revisioned station/train/timetable dataset with moderated corrections.

mod api;
mod auth;
mod config;
mod dataset;
mod db;
mod errors;
mod estimator;
mod intake;
mod journeys;
mod models;
mod search;
mod timetable;

use std::sync::Arc;

use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use dataset::DatasetStore;
use db::Repository;
use estimator::Estimator;
use intake::ReportIntake;
use models::EstimateStatus;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DatasetStore>,
    pub estimator: Arc<Estimator>,
    pub intake: Arc<ReportIntake>,
    pub search: Arc<SearchIndex>,
    pub config: Arc<Config>,
}

fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    init_logging(&config);

    tracing::info!("Starting Find My Train Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Seed dataset: {:?}", config.dataset_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.moderator_psk.is_none() {
        tracing::warn!(
            "No moderator key configured (FMT_MODERATOR_PSK). Moderation routes are open!"
        );
    }

    let pool = db::init_database(&config.db_path).await?;
    let store = Arc::new(DatasetStore::open(Repository::new(pool), &config.dataset_path).await?);

    let search = Arc::new(SearchIndex::open(&config.index_path)?);
    let snapshot = store.current().await;
    search.rebuild(snapshot.revision, &snapshot.stations).await?;

    let estimator = Arc::new(Estimator::new(config.estimator.clone()));
    let intake = Arc::new(ReportIntake::new(store.clone(), estimator.clone()));

    spawn_sweeper(store.clone(), estimator.clone(), config.sweep_interval);

    let state = AppState {
        store,
        estimator,
        intake,
        search,
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically evict expired reports, even for trains nobody reports on.
fn spawn_sweeper(
    store: Arc<DatasetStore>,
    estimator: Arc<Estimator>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = store.current().await;
            estimator.sweep(&snapshot, Utc::now()).await;
        }
    })
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.moderator_psk.clone();

    // Moderation routes require the moderator key
    let moderation_routes = Router::new()
        .route("/corrections", get(api::list_proposals))
        .route("/corrections/{id}", get(api::get_proposal))
        .route("/corrections/{id}/decision", post(api::decide_proposal))
        .layer(middleware::from_fn(move |req, next| {
            auth::moderator_auth_layer(psk.clone(), req, next)
        }));

    let api_routes = Router::new()
        // Dataset
        .route("/dataset", get(api::get_dataset))
        .route("/dataset/revision", get(api::get_revision))
        // Stations
        .route("/stations/search", get(api::search_stations))
        .route("/journeys", get(api::get_journeys))
        .route("/journeys/nearby", get(api::get_nearby_journeys))
        // Positions
        .route("/positions", get(api::get_positions))
        .route("/positions/{train_id}", get(api::get_position))
        .route("/live", get(api::get_live))
        // Reports and corrections
        .route("/reports", post(api::submit_report))
        .route("/corrections", post(api::propose_correction))
        .nest("/moderation", moderation_routes);

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Liveness plus a summary of what the service currently knows.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthStatus {
    status: &'static str,
    timestamp: i64,
    revision: i64,
    active_trains_confirmed: usize,
    active_trains_unconfirmed: usize,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let now = Utc::now();
    let live = state.estimator.live_trains(now).await;
    let confirmed = live
        .iter()
        .filter(|e| e.status == EstimateStatus::Confirmed)
        .count();

    Json(HealthStatus {
        status: "healthy",
        timestamp: now.timestamp(),
        revision: state.store.get_revision().await,
        active_trains_confirmed: confirmed,
        active_trains_unconfirmed: live.len() - confirmed,
    })
}
