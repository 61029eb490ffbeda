use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::error::AppError;
use crate::store::{Partition, SnapshotStore};
use crate::types::{MarketId, MarketSnapshot, PostedRecord};

/// Default and maximum page size for `/events`.
const DEFAULT_EVENTS_LIMIT: usize = 50;
const MAX_EVENTS_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn SnapshotStore>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/events", get(get_events))
        .route("/posted", post(post_posted))
        .route("/markets/:partition", get(get_markets))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct MarketsQuery {
    pub min: Option<MarketId>,
    pub max: Option<MarketId>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store_ok: bool,
    pub last_run_at_ms: Option<u64>,
    pub runs_completed: u64,
    pub last_run_queued: u64,
    pub last_run_scored: bool,
    pub queue_len: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let store_ok = state.store.ping().await.is_ok();
    let queue_len = if store_ok { state.store.queue_len().await.ok() } else { None };
    let last_run = state.health.last_run_at_ms();

    Json(HealthResponse {
        status: if store_ok { "ok" } else { "degraded" },
        store_ok,
        last_run_at_ms: (last_run > 0).then_some(last_run),
        runs_completed: state.health.runs_completed(),
        last_run_queued: state.health.last_run_queued(),
        last_run_scored: state.health.last_run_scored(),
        queue_len,
    })
}

async fn get_events(
    State(state): State<ApiState>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Vec<serde_json::Value>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_EVENTS_LIMIT).min(MAX_EVENTS_LIMIT);

    let raw = state.store.queued_events(limit).await?;
    let events = raw
        .iter()
        .filter_map(|payload| match serde_json::from_str(payload) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("skipping unreadable queue entry: {e}");
                None
            }
        })
        .collect();

    Ok(Json(events))
}

async fn post_posted(
    State(state): State<ApiState>,
    Json(record): Json<PostedRecord>,
) -> Result<StatusCode, AppError> {
    state.store.record_posted(&record).await?;
    info!(
        market_id = record.market_id,
        event_type = %record.event_type,
        timestamp = record.timestamp,
        "story marked as posted"
    );
    Ok(StatusCode::CREATED)
}

async fn get_markets(
    State(state): State<ApiState>,
    Path(partition): Path<String>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<Vec<MarketSnapshot>>, AppError> {
    let partition = match partition.as_str() {
        "active" => Partition::Active,
        "finalized" => Partition::Finalized,
        other => return Err(AppError::BadRequest(format!("unknown partition '{other}'"))),
    };
    let min = params.min.unwrap_or(0);
    let max = params.max.unwrap_or(MarketId::MAX);
    if min > max {
        return Err(AppError::BadRequest(format!("min {min} exceeds max {max}")));
    }

    let snapshots = state.store.range_by_score(partition, min, max).await?;
    Ok(Json(snapshots))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50, p95, p99) = state.latency.percentiles();
    let to_ms = |us: Option<u64>| us.map(|v| v as f64 / 1_000.0);

    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms: to_ms(p50),
        p95_ms: to_ms(p95),
        p99_ms: to_ms(p99),
    })
}
