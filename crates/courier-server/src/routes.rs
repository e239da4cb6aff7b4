//! HTTP request handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use courier_core::session::{SessionKey, SessionStatus};
use courier_gateway::{GatewayError, SessionView};
use courier_store::MessageRepo;

use crate::server::AppState;

const DEFAULT_MESSAGE_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub client_id: Option<String>,
    pub session_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub client_id: Option<String>,
    pub session_name: Option<String>,
    pub to: Option<String>,
    pub text: Option<String>,
    pub lead_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub session_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub lead_id: Option<String>,
    pub limit: Option<u32>,
}

/// Flattened session state returned by the session endpoints.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub client_id: String,
    pub session_name: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl SessionResponse {
    fn from_view(view: SessionView) -> Self {
        Self {
            client_id: view.key.client_id,
            session_name: view.key.session_name,
            status: view.status,
            qr_code: view.qr_code,
            phone_number: view.phone_number,
        }
    }

    fn disconnected(key: &SessionKey) -> Self {
        Self {
            client_id: key.client_id.clone(),
            session_name: key.session_name.clone(),
            status: SessionStatus::Disconnected,
            qr_code: None,
            phone_number: None,
        }
    }
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn map_gateway_error(err: GatewayError) -> ApiError {
    let status = if err.is_caller_error() {
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %err, kind = err.error_kind(), "request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "error": err.to_string() })))
}

/// Pull a validated session key out of a request body.
fn session_key(client_id: Option<String>, session_name: Option<String>) -> Result<SessionKey, ApiError> {
    match client_id {
        Some(id) if !id.trim().is_empty() => Ok(SessionKey::new(id, session_name)),
        _ => Err(bad_request("client_id is required")),
    }
}

/// POST /api/sessions/start
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let key = session_key(req.client_id, req.session_name)?;
    let view = state.registry.start(&key).await;
    Ok(Json(SessionResponse::from_view(view)))
}

/// GET /api/sessions/{client_id}/status
///
/// A key with no live session reports `disconnected` rather than 404, so
/// callers can poll without special-casing.
pub async fn session_status(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<SessionResponse>, ApiError> {
    let key = session_key(Some(client_id), query.session_name)?;
    let response = match state.registry.get(&key) {
        Some(view) => SessionResponse::from_view(view),
        None => SessionResponse::disconnected(&key),
    };
    Ok(Json(response))
}

/// POST /api/messages/send
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = session_key(req.client_id, req.session_name)?;
    let to = match req.to {
        Some(to) if !to.trim().is_empty() => to,
        _ => return Err(bad_request("to is required")),
    };
    let text = match req.text {
        Some(text) if !text.is_empty() => text,
        _ => return Err(bad_request("text is required")),
    };

    let sent = state
        .registry
        .send(&key, &to, &text, req.lead_id)
        .await
        .map_err(map_gateway_error)?;

    Ok(Json(json!({ "message_id": sent.protocol_message_id })))
}

/// POST /api/sessions/disconnect
pub async fn disconnect_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = session_key(req.client_id, req.session_name)?;
    state
        .registry
        .disconnect(&key)
        .await
        .map_err(map_gateway_error)?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/messages/{client_id}
pub async fn list_messages(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if client_id.trim().is_empty() {
        return Err(bad_request("client_id is required"));
    }
    let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);

    let messages = MessageRepo::new(state.db.clone())
        .list_for_client(&client_id, query.lead_id.as_deref(), limit)
        .map_err(|e| {
            tracing::error!(error = %e, client_id = %client_id, "message listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?;

    Ok(Json(json!({ "messages": messages })))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "active_sessions": state.registry.active_count(),
        "subscribers": state.subscribers.count(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
