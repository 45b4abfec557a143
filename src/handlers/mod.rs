pub mod account;
pub mod admin;
pub mod auth;
pub mod calls;
pub mod health;
pub mod schedules;
pub mod webhook;

use axum::http::HeaderMap;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::User;
use crate::state::AppState;

fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
}

/// Resolves the session token to its user. Takes the db lock, so call it
/// before opening your own lock scope.
pub fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let token = bearer_token(headers);
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }
    let db = state.db.lock().unwrap();
    queries::get_session_user(&db, token)?.ok_or(AppError::Unauthorized)
}

pub fn check_admin(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    if expected_token.is_empty() || bearer_token(headers) != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}
