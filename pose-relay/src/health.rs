//! Side-channel HTTP handlers: health, readiness, metrics, room listings

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    error::Error,
    ids::RoomCode,
    metrics::MetricsSnapshot,
    relay::RoomSummary,
    state::AppState,
};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service name
    pub service: String,

    /// Version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Readiness check response with component status
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,

    /// Service name
    pub service: String,

    /// Component statuses
    pub dependencies: HashMap<String, DependencyStatus>,
}

/// Individual component status
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub healthy: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `GET /metrics` body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub active_sessions: usize,
    pub active_rooms: usize,
}

/// Liveness probe; always 200 while the process is serving
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness probe
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut dependencies = HashMap::new();
    let sessions = state.relay.sessions().len();
    let rooms = state.relay.rooms().len().await;
    dependencies.insert(
        "relay".to_string(),
        DependencyStatus {
            healthy: true,
            message: Some(format!("{sessions} sessions in {rooms} rooms")),
        },
    );

    let response = ReadinessResponse {
        ready: true,
        service: state.config().service.name.clone(),
        dependencies,
    };

    (StatusCode::OK, Json(response))
}

/// Read-only counters
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        metrics: state.relay.metrics().snapshot(),
        active_sessions: state.relay.sessions().len(),
        active_rooms: state.relay.rooms().len().await,
    })
}

/// All live rooms
pub async fn rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.relay.rooms().room_list().await)
}

/// One room by code
pub async fn room(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RoomSummary>, Error> {
    let code = RoomCode::parse(&code).map_err(|e| Error::BadRequest(e.to_string()))?;
    state
        .relay
        .rooms()
        .summary(&code)
        .await
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("room {code}")))
}
