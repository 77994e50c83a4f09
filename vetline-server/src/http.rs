//! Vetline HTTP REST API
//!
//! Axum server exposing the request gateway to the presentation layer. Each
//! endpoint is a thin handler over an inner function that builds a
//! `GatewayRequest`, runs it through the shared router and maps the outcome
//! to a status code. The inner functions are directly testable.
//!
//! Endpoints:
//! - POST /requests                          - submit an emergency request
//! - GET  /requests/:id                      - session snapshot
//! - GET  /requests/:id/candidates           - ranked responders (`?radius_km=`)
//! - POST /requests/:id/select               - responder acceptance
//! - POST /requests/:id/messages             - post a chat message
//! - GET  /requests/:id/messages             - message log (`?after=seq`)
//! - POST /requests/:id/close                - close the session
//! - PUT  /responders/:id/availability       - update availability
//! - GET  /responders/:id/notifications      - drain pending notices
//! - GET  /health, GET /version

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;
use vetline_core::ipc::{GatewayRequest, GatewayResponse};
use vetline_core::models::SubmitRequestInput;
use vetline_core::VetlineConfig;

use crate::subsystems::gateway::Gateway;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub gateway: Arc<Gateway>,
    pub config: VetlineConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/requests", post(submit_handler))
        .route("/requests/:id", get(session_handler))
        .route("/requests/:id/candidates", get(candidates_handler))
        .route("/requests/:id/select", post(select_handler))
        .route(
            "/requests/:id/messages",
            post(post_message_handler).get(get_messages_handler),
        )
        .route("/requests/:id/close", post(close_handler))
        .route("/responders/:id/availability", put(availability_handler))
        .route("/responders/:id/notifications", get(notifications_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    gateway: Arc<Gateway>,
    config: VetlineConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { gateway, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Vetline HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct CandidatesQuery {
    pub radius_km: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MessagesQuery {
    pub after: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SelectBody {
    #[serde(default)]
    pub responder_id: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct MessageBody {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: String,
    pub responder_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CloseBody {
    #[serde(default)]
    pub by: String,
    pub responder_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AvailabilityBody {
    #[serde(default)]
    pub availability: String,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Inner health check: gateway counters plus the configured transports.
pub async fn health_inner(gateway: &Gateway, config: &VetlineConfig) -> (StatusCode, serde_json::Value) {
    let (status, mut body) = dispatch(gateway, GatewayRequest::Health).await;
    if let Some(obj) = body.as_object_mut() {
        obj.insert(
            "socket".to_string(),
            serde_json::json!(config.service.socket_path),
        );
    }
    (status, body)
}

/// Inner version: pure, no IO.
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "vetline/1",
    })
}

/// Inner submit: `201 Created` on success, whatever the matching outcome.
pub async fn submit_inner(gateway: &Gateway, input: SubmitRequestInput) -> (StatusCode, serde_json::Value) {
    match dispatch(gateway, GatewayRequest::SubmitRequest(input)).await {
        (StatusCode::OK, body) => (StatusCode::CREATED, body),
        other => other,
    }
}

pub async fn session_inner(gateway: &Gateway, id: &str) -> (StatusCode, serde_json::Value) {
    with_request_id(id, |request_id| dispatch(gateway, GatewayRequest::GetSession { request_id })).await
}

pub async fn candidates_inner(
    gateway: &Gateway,
    id: &str,
    query: CandidatesQuery,
) -> (StatusCode, serde_json::Value) {
    with_request_id(id, |request_id| {
        dispatch(
            gateway,
            GatewayRequest::ListCandidates {
                request_id,
                radius_km: query.radius_km,
            },
        )
    })
    .await
}

pub async fn select_inner(gateway: &Gateway, id: &str, body: SelectBody) -> (StatusCode, serde_json::Value) {
    with_request_id(id, |request_id| {
        dispatch(
            gateway,
            GatewayRequest::SelectResponder {
                request_id,
                responder_id: body.responder_id,
            },
        )
    })
    .await
}

pub async fn post_message_inner(gateway: &Gateway, id: &str, body: MessageBody) -> (StatusCode, serde_json::Value) {
    with_request_id(id, |request_id| {
        dispatch(
            gateway,
            GatewayRequest::PostMessage {
                request_id,
                sender: body.sender,
                content: body.content,
                responder_id: body.responder_id,
            },
        )
    })
    .await
}

pub async fn get_messages_inner(
    gateway: &Gateway,
    id: &str,
    query: MessagesQuery,
) -> (StatusCode, serde_json::Value) {
    with_request_id(id, |request_id| {
        dispatch(
            gateway,
            GatewayRequest::GetMessages {
                request_id,
                after: query.after,
            },
        )
    })
    .await
}

pub async fn close_inner(gateway: &Gateway, id: &str, body: CloseBody) -> (StatusCode, serde_json::Value) {
    with_request_id(id, |request_id| {
        dispatch(
            gateway,
            GatewayRequest::CloseSession {
                request_id,
                by: body.by,
                responder_id: body.responder_id,
            },
        )
    })
    .await
}

pub async fn availability_inner(
    gateway: &Gateway,
    responder_id: String,
    body: AvailabilityBody,
) -> (StatusCode, serde_json::Value) {
    dispatch(
        gateway,
        GatewayRequest::SetAvailability {
            responder_id,
            availability: body.availability,
        },
    )
    .await
}

pub async fn notifications_inner(gateway: &Gateway, responder_id: String) -> (StatusCode, serde_json::Value) {
    dispatch(gateway, GatewayRequest::PendingNotifications { responder_id }).await
}

// ============================================================================
// Axum handler wrappers (thin - delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.gateway, &state.config).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn submit_handler(
    State(state): State<Arc<HttpState>>,
    Json(input): Json<SubmitRequestInput>,
) -> impl IntoResponse {
    let (status, body) = submit_inner(&state.gateway, input).await;
    (status, Json(body))
}

pub async fn session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = session_inner(&state.gateway, &id).await;
    (status, Json(body))
}

pub async fn candidates_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Query(query): Query<CandidatesQuery>,
) -> impl IntoResponse {
    let (status, body) = candidates_inner(&state.gateway, &id, query).await;
    (status, Json(body))
}

pub async fn select_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(body): Json<SelectBody>,
) -> impl IntoResponse {
    let (status, body) = select_inner(&state.gateway, &id, body).await;
    (status, Json(body))
}

pub async fn post_message_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> impl IntoResponse {
    let (status, body) = post_message_inner(&state.gateway, &id, body).await;
    (status, Json(body))
}

pub async fn get_messages_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> impl IntoResponse {
    let (status, body) = get_messages_inner(&state.gateway, &id, query).await;
    (status, Json(body))
}

pub async fn close_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(body): Json<CloseBody>,
) -> impl IntoResponse {
    let (status, body) = close_inner(&state.gateway, &id, body).await;
    (status, Json(body))
}

pub async fn availability_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(body): Json<AvailabilityBody>,
) -> impl IntoResponse {
    let (status, body) = availability_inner(&state.gateway, id, body).await;
    (status, Json(body))
}

pub async fn notifications_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = notifications_inner(&state.gateway, id).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

async fn dispatch(gateway: &Gateway, request: GatewayRequest) -> (StatusCode, serde_json::Value) {
    response_to_http(crate::router::handle_request(request, gateway).await)
}

/// Parse a path id, answering 400 with the usual error body when it is not a UUID.
async fn with_request_id<F, Fut>(id: &str, f: F) -> (StatusCode, serde_json::Value)
where
    F: FnOnce(Uuid) -> Fut,
    Fut: std::future::Future<Output = (StatusCode, serde_json::Value)>,
{
    match Uuid::parse_str(id.trim()) {
        Ok(request_id) => f(request_id).await,
        Err(_) => (
            StatusCode::BAD_REQUEST,
            error_body("validation_error", &format!("invalid request id '{}'", id)),
        ),
    }
}

/// Map an error code from `VetlineError::code` to an HTTP status.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "validation_error" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "conflict" => StatusCode::CONFLICT,
        "no_candidates" => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a `GatewayResponse` into an HTTP status and JSON body.
pub fn response_to_http(response: GatewayResponse) -> (StatusCode, serde_json::Value) {
    if response.is_ok() {
        return (StatusCode::OK, response.data.unwrap_or(serde_json::json!({})));
    }
    let code = response.code.unwrap_or_else(|| "internal_error".to_string());
    let error = response.error.unwrap_or_else(|| "unknown error".to_string());
    (status_for_code(&code), error_body(&code, &error))
}

fn error_body(code: &str, error: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "code": code,
        "error": error,
    })
}

// ============================================================================
// Unit Tests - call inner functions directly
// ============================================================================
