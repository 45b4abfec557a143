use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Bundle;
use crate::state::AppState;

use super::check_admin;

// GET /api/admin/status
#[derive(Serialize)]
pub struct StatusResponse {
    paused: bool,
    users: i64,
    active_schedules: i64,
    open_calls: i64,
    calls_today: i64,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    check_admin(&headers, &state.config.admin_token)?;

    let paused = state.paused.load(Ordering::SeqCst);
    let stats = {
        let db = state.db.lock().unwrap();
        queries::get_service_stats(&db)?
    };

    Ok(Json(StatusResponse {
        paused,
        users: stats.users,
        active_schedules: stats.active_schedules,
        open_calls: stats.open_calls,
        calls_today: stats.calls_today,
    }))
}

// POST /api/admin/pause
pub async fn pause_dialing(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    check_admin(&headers, &state.config.admin_token)?;
    state.paused.store(true, Ordering::SeqCst);
    tracing::warn!("outbound dialing paused");
    Ok(Json(serde_json::json!({"ok": true, "paused": true})))
}

// POST /api/admin/resume
pub async fn resume_dialing(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    check_admin(&headers, &state.config.admin_token)?;
    state.paused.store(false, Ordering::SeqCst);
    tracing::info!("outbound dialing resumed");
    Ok(Json(serde_json::json!({"ok": true, "paused": false})))
}

// POST /api/admin/credits
//
// Manual credit adjustment, also how paid bundles get fulfilled while
// checkout happens off-platform.
#[derive(Deserialize)]
pub struct GrantCreditsBody {
    pub email: String,
    pub bundle: Option<String>,
    pub credits: Option<i64>,
    pub reason: Option<String>,
}

pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GrantCreditsBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_admin(&headers, &state.config.admin_token)?;

    let (delta, reason) = match &body.bundle {
        Some(name) => {
            let bundle = Bundle::parse(name)
                .ok_or_else(|| AppError::Validation(format!("unknown bundle: {name}")))?;
            (bundle.credits(), format!("bundle_{}", bundle.as_str()))
        }
        None => {
            let delta = body
                .credits
                .ok_or_else(|| AppError::Validation("need bundle or credits".to_string()))?;
            if delta == 0 {
                return Err(AppError::Validation("credits must be non-zero".to_string()));
            }
            (delta, body.reason.clone().unwrap_or_else(|| "admin_grant".to_string()))
        }
    };

    let db = state.db.lock().unwrap();
    let Some(user) = queries::get_user_by_email(&db, &body.email)? else {
        return Err(AppError::NotFound("user".to_string()));
    };

    if !queries::adjust_credits(&db, &user.id, delta, &reason)? {
        return Err(AppError::Validation(
            "adjustment would make the balance negative".to_string(),
        ));
    }

    let after = queries::get_user_by_id(&db, &user.id)?.map(|u| u.credits).unwrap_or(0);
    tracing::info!(user_id = %user.id, delta, reason = %reason, "credits adjusted");
    Ok(Json(serde_json::json!({"ok": true, "credits": after})))
}
