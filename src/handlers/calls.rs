use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::state::AppState;

use super::require_user;

// GET /api/calls
#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct CallResponse {
    id: String,
    schedule_id: String,
    /// Local civil date of the wake-up this attempt belonged to.
    occurrence: String,
    attempt: i32,
    scheduled_at: String,
    status: String,
    duration_secs: Option<i64>,
    recording_url: Option<String>,
    failure_reason: Option<String>,
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<CallResponse>>, AppError> {
    let user = require_user(&state, &headers)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let calls = {
        let db = state.db.lock().unwrap();
        queries::get_history_for_user(&db, &user.id, limit)?
    };

    let response = calls
        .into_iter()
        .map(|c| CallResponse {
            id: c.id,
            schedule_id: c.schedule_id,
            occurrence: c.occurrence.format("%Y-%m-%d").to_string(),
            attempt: c.attempt,
            scheduled_at: c.scheduled_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            status: c.status.as_str().to_string(),
            duration_secs: c.duration_secs,
            recording_url: c.recording_url,
            failure_reason: c.failure_reason,
        })
        .collect();

    Ok(Json(response))
}
