//! REST API for the status/control surface
//!
//! Exposes engine snapshots and registration commands over HTTP for the
//! browser dashboard and external controllers. CORS is open: the dashboard
//! is served from a different origin. Default port: 5000.

use crate::actions::Actions;
use crate::engine::RegistrationAck;
use crate::error::RegistrationError;
use crate::registry::Division;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state for API handlers
pub struct ApiState {
    pub actions: Arc<Actions>,
}

/// API error response with status code
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        let status = match err {
            RegistrationError::UnknownStop(_)
            | RegistrationError::UnknownCoupler(_)
            | RegistrationError::UnknownTremulant(_) => StatusCode::NOT_FOUND,
            RegistrationError::NotEnclosed(_) => StatusCode::BAD_REQUEST,
            RegistrationError::EngineUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/stops", get(list_stops))
        .route("/api/stops/active", get(active_stops))
        .route("/api/stops/all-clear", post(all_clear))
        .route("/api/stops/:id/on", post(stop_on))
        .route("/api/stops/:id/off", post(stop_off))
        .route("/api/stops/:id/toggle", post(stop_toggle))
        .route("/api/couplers/:id/toggle", post(coupler_toggle))
        .route("/api/swell/:division", post(set_swell))
        .route("/api/tremulant/:id", post(set_tremulant))
        .route("/api/panic", post(panic_route))
        .route("/api/state", get(full_state))
        .route("/api/state/keys", get(state_keys))
        .route("/api/state/notes", get(state_notes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /api/health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/status
async fn status(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let report = state.actions.status().await;
    Json(json!({
        "active_stops": report.active_stops,
        "engaged_couplers": report.engaged_couplers,
        "active_keys_count": report.active_keys_count,
        "active_rank_notes_count": report.active_notes_count,
        "degraded_outputs": report.degraded_outputs,
    }))
}

#[derive(Deserialize)]
struct StopsQuery {
    division: Option<String>,
}

/// GET /api/stops[?division=great]
async fn list_stops(
    Query(query): Query<StopsQuery>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, ApiError> {
    let division = match query.division {
        Some(ref raw) => Some(
            Division::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown division: {}", raw)))?,
        ),
        None => None,
    };

    let stops = state.actions.list_stops(division).await;
    Ok(Json(json!({ "stops": stops })))
}

/// GET /api/stops/active
async fn active_stops(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({ "active_stops": state.actions.active_stops().await }))
}

/// POST /api/stops/:id/on
async fn stop_on(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, ApiError> {
    let ack = state.actions.draw_stop(&id).await?;
    Ok(Json(ack_body(ack)))
}

/// POST /api/stops/:id/off
async fn stop_off(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, ApiError> {
    let ack = state.actions.retire_stop(&id).await?;
    Ok(Json(ack_body(ack)))
}

/// POST /api/stops/:id/toggle
async fn stop_toggle(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, ApiError> {
    let ack = state.actions.toggle_stop(&id).await?;
    Ok(Json(ack_body(ack)))
}

/// POST /api/stops/all-clear
async fn all_clear(State(state): State<Arc<ApiState>>) -> Result<Json<Value>, ApiError> {
    let count = state.actions.all_clear().await?;
    Ok(Json(json!({ "success": true, "count": count })))
}

/// POST /api/couplers/:id/toggle
async fn coupler_toggle(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, ApiError> {
    let ack = state.actions.toggle_coupler(&id).await?;
    Ok(Json(ack_body(ack)))
}

#[derive(Deserialize)]
struct SwellRequest {
    position: u8,
}

/// POST /api/swell/:division
async fn set_swell(
    Path(division): Path<String>,
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SwellRequest>,
) -> Result<Json<Value>, ApiError> {
    let division = Division::parse(&division)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown division: {}", division)))?;
    let ack = state.actions.set_swell(division, req.position).await?;
    Ok(Json(ack_body(ack)))
}

#[derive(Deserialize)]
struct TremulantRequest {
    engaged: bool,
}

/// POST /api/tremulant/:id
async fn set_tremulant(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
    Json(req): Json<TremulantRequest>,
) -> Result<Json<Value>, ApiError> {
    let ack = state.actions.set_tremulant(&id, req.engaged).await?;
    Ok(Json(ack_body(ack)))
}

/// POST /api/panic
async fn panic_route(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let outputs = state.actions.panic().await;
    info!("API: panic sent to {} addresses", outputs);
    Json(json!({ "success": true, "outputs_count": outputs }))
}

/// GET /api/state
async fn full_state(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!(state.actions.state().await))
}

/// GET /api/state/keys
async fn state_keys(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({ "keys": state.actions.state().await.held_keys }))
}

/// GET /api/state/notes
async fn state_notes(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({ "notes": state.actions.state().await.sounding_notes }))
}

fn ack_body(ack: RegistrationAck) -> Value {
    match ack {
        RegistrationAck::Stop { id, name, drawn } => json!({
            "success": true, "stop_id": id, "stop_name": name, "drawn": drawn
        }),
        RegistrationAck::Coupler { id, engaged } => json!({
            "success": true, "coupler_id": id, "engaged": engaged
        }),
        RegistrationAck::Swell { division, position } => json!({
            "success": true, "division": division, "position": position
        }),
        RegistrationAck::Tremulant { group, engaged } => json!({
            "success": true, "group": group, "engaged": engaged
        }),
        RegistrationAck::AllClear { withdrawn } => json!({
            "success": true, "count": withdrawn
        }),
        RegistrationAck::Panic { addresses } => json!({
            "success": true, "outputs_count": addresses
        }),
    }
}

/// Start the API server
pub async fn start_server(actions: Arc<Actions>, port: u16) -> Result<()> {
    let state = Arc::new(ApiState { actions });
    let router = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting control API on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
