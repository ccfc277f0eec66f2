//! HTTP API: ingest, history queries, live events, health and metrics

use crate::pipeline::Stores;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use monitor_lib::{
    AnomalyEvent, ComponentStatus, HealthRegistry, MachineId, MonitorError, MonitorEvent,
    RollupRecord, SensorEvent, TempMessage, VibMessage,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{info, warn};

const DEFAULT_ANOMALY_LIMIT: usize = 50;
const MAX_ANOMALY_LIMIT: usize = 1000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub ingest_tx: mpsc::Sender<SensorEvent>,
    pub events: broadcast::Sender<MonitorEvent>,
    pub stores: Stores,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        ingest_tx: mpsc::Sender<SensorEvent>,
        events: broadcast::Sender<MonitorEvent>,
        stores: Stores,
    ) -> Self {
        Self {
            health_registry,
            ingest_tx,
            events,
            stores,
        }
    }
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

/// Rollups of both machines
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub machine_1: Vec<RollupRecord>,
    pub machine_2: Vec<RollupRecord>,
}

#[derive(Debug, Deserialize)]
pub struct AnomalyQuery {
    pub limit: Option<usize>,
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date '{}', expected YYYY-MM-DD", raw)))
}

async fn enqueue(state: &AppState, event: SensorEvent) -> Result<StatusCode, ApiError> {
    state
        .ingest_tx
        .send(event)
        .await
        .map_err(|_| ApiError::Unavailable("ingestion worker is not running".to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

async fn ingest_vib(
    State(state): State<Arc<AppState>>,
    Json(message): Json<VibMessage>,
) -> Result<StatusCode, ApiError> {
    enqueue(&state, SensorEvent::Vib(message)).await
}

async fn ingest_temp(
    State(state): State<Arc<AppState>>,
    Json(message): Json<TempMessage>,
) -> Result<StatusCode, ApiError> {
    enqueue(&state, SensorEvent::Temp(message)).await
}

/// Hourly rollups of one day
async fn history_day(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let date = parse_date(&date)?;
    let mut per_machine = Vec::with_capacity(2);
    for id in MachineId::ALL {
        per_machine.push(match state.stores.rollups.get(&id) {
            Some(store) => store.hourly_for_day(date).await?,
            None => Vec::new(),
        });
    }
    Ok(Json(into_history(per_machine)))
}

/// Daily rollups over an inclusive date range
async fn history_range(
    State(state): State<Arc<AppState>>,
    Path((start, end)): Path<(String, String)>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let start = parse_date(&start)?;
    let end = parse_date(&end)?;
    if start > end {
        return Err(ApiError::BadRequest("start is after end".to_string()));
    }

    let mut per_machine = Vec::with_capacity(2);
    for id in MachineId::ALL {
        per_machine.push(match state.stores.rollups.get(&id) {
            Some(store) => store.daily_between(start, end).await?,
            None => Vec::new(),
        });
    }
    Ok(Json(into_history(per_machine)))
}

fn into_history(mut per_machine: Vec<Vec<RollupRecord>>) -> HistoryResponse {
    let machine_2 = per_machine.pop().unwrap_or_default();
    let machine_1 = per_machine.pop().unwrap_or_default();
    HistoryResponse {
        machine_1,
        machine_2,
    }
}

async fn anomalies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnomalyQuery>,
) -> Result<Json<Vec<AnomalyEvent>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ANOMALY_LIMIT)
        .min(MAX_ANOMALY_LIMIT);
    Ok(Json(state.stores.anomalies.recent_anomalies(limit).await?))
}

/// Live stream of raw events and inference results
async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|received| {
        let sse = match received {
            Ok(event) => Event::default().event(event.kind()).json_data(&event).ok(),
            Err(e) => {
                // Slow subscriber; skip what was missed
                warn!(error = %e, "Event subscriber lagged");
                None
            }
        };
        sse.map(Ok)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        return ApiError::Internal(e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ingest/vib", post(ingest_vib))
        .route("/ingest/temp", post(ingest_temp))
        .route("/history/:date", get(history_day))
        .route("/history/:start/:end", get(history_range))
        .route("/anomalies", get(anomalies))
        .route("/events", get(events))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
