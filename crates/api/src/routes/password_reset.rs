//! Password reset routes: request a code, trade it for a ticket, set the password.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use salon_common::error::AppError;
use salon_engine::password_reset::VerifiedCode;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/password-reset/request", post(request_code))
        .route("/api/auth/password-reset/verify", post(verify_code))
        .route("/api/auth/password-reset/confirm", post(confirm_reset))
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub ticket: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub reset: bool,
}

/// POST /api/auth/password-reset/request
///
/// Always 202 for well-formed emails, whether or not an account exists.
async fn request_code(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    state.password_reset.request_code(&req.email).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "If the email is registered, a reset code is on its way" })),
    ))
}

/// POST /api/auth/password-reset/verify
async fn verify_code(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifiedCode>, AppError> {
    let verified = state
        .password_reset
        .verify_code(&req.email, &req.code)
        .await?;
    Ok(Json(verified))
}

/// POST /api/auth/password-reset/confirm
async fn confirm_reset(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, AppError> {
    state
        .password_reset
        .reset_password(&req.ticket, &req.new_password)
        .await?;
    Ok(Json(ConfirmResponse { reset: true }))
}
