use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    engine::{NewSecret, SecretError},
    policy::Caller,
    AppState,
};

/// Map an engine error onto a wire response. Reason codes stay distinct
/// where the caller needs them (`expired` vs `already_viewed` drives the
/// unavailable page, `password_required` vs `invalid_password` drives
/// the prompt); internals never leak detail.
fn error_response(err: SecretError) -> Response {
    let (status, code) = match &err {
        SecretError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        SecretError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        SecretError::Expired => (StatusCode::GONE, "expired"),
        SecretError::AlreadyViewed => (StatusCode::GONE, "already_viewed"),
        SecretError::PasswordRequired => (StatusCode::UNAUTHORIZED, "password_required"),
        SecretError::InvalidPassword => (StatusCode::FORBIDDEN, "invalid_password"),
        SecretError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        SecretError::CorruptData | SecretError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };

    let message = match &err {
        SecretError::CorruptData | SecretError::Internal(_) => {
            tracing::error!(error = %err, "internal error");
            "internal server error".to_owned()
        }
        other => other.to_string(),
    };

    (status, Json(json!({"error": code, "message": message}))).into_response()
}

// ── Health ───────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub content: String,
    #[serde(default)]
    pub is_one_time_view: bool,
    pub expires_in_ms: Option<i64>,
    pub password: Option<String>,
}

pub async fn create_secret(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<CreateRequest>,
) -> Response {
    if caller.is_anonymous() && !state.allow_anonymous {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "auth_required", "message": "anonymous creation is disabled"})),
        )
            .into_response();
    }

    // Rate limiting of anonymous creation is deliberately left to the
    // deployment in front of this server (reverse proxy or gateway).
    let req = NewSecret {
        content: body.content,
        is_one_time_view: body.is_one_time_view,
        expires_in_ms: body.expires_in_ms,
        password: body.password,
    };

    match state.engine.create(req, &caller) {
        Ok(created) => {
            info!(id = %created.id, one_time = body.is_one_time_view, "secret created");
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Info ─────────────────────────────────────────────────────────────────────

pub async fn get_secret_info(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    match state.engine.get_info(&token) {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Redeem ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RedeemRequest {
    pub password: Option<String>,
}

pub async fn redeem_secret(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Option<Json<RedeemRequest>>,
) -> Response {
    let Json(body) = body.unwrap_or_default();
    match state.engine.redeem(&token, body.password.as_deref()) {
        Ok(redeemed) => {
            info!(one_time = redeemed.is_one_time_view, "secret redeemed");
            Json(redeemed).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Delete ───────────────────────────────────────────────────────────────────

pub async fn delete_secret(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Response {
    match state.engine.delete(&id, &caller) {
        Ok(()) => {
            info!(id = %id, "secret deleted");
            Json(json!({"success": true})).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── List ─────────────────────────────────────────────────────────────────────

pub async fn list_secrets(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Response {
    match state.engine.list_owned(&caller) {
        Ok(summaries) => Json(json!({"secrets": summaries})).into_response(),
        Err(e) => error_response(e),
    }
}
