use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::OtpPurpose;
use crate::services::auth;
use crate::state::AppState;

// POST /api/auth/request-code
#[derive(Deserialize)]
pub struct RequestCodeBody {
    pub email: String,
}

pub async fn request_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestCodeBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = auth::normalize_email(&body.email)?;
    auth::request_otp(&state, &email, OtpPurpose::EmailLogin).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

// POST /api/auth/verify
#[derive(Deserialize)]
pub struct VerifyBody {
    pub email: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
    user_id: String,
    email: String,
    credits: i64,
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyBody>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = auth::normalize_email(&body.email)?;

    let db = state.db.lock().unwrap();
    auth::verify_otp(&db, &state.config, &email, OtpPurpose::EmailLogin, &body.code)?;
    let user = auth::login_or_signup(&db, &state.config, &email)?;
    let session = auth::create_session(&db, &state.config, &user.id)?;

    tracing::info!(user_id = %user.id, "login");
    Ok(Json(LoginResponse {
        token: session.token,
        user_id: user.id,
        email: user.email,
        credits: user.credits,
    }))
}

// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !token.is_empty() {
        let db = state.db.lock().unwrap();
        queries::delete_session(&db, token)?;
    }
    Ok(Json(serde_json::json!({"ok": true})))
}
