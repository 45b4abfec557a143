use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{schedule, Recurrence, Schedule, WeekdaySet};
use crate::services::scheduler;
use crate::state::AppState;

use super::require_user;

#[derive(Serialize)]
pub struct ScheduleResponse {
    id: String,
    wake_time: String,
    timezone: String,
    weekdays: Vec<&'static str>,
    recurrence: String,
    call_retry: bool,
    advance_notice: bool,
    active: bool,
    /// UTC instant of the next pending attempt, if one is lined up.
    next_call_at: Option<String>,
    created_at: String,
}

fn schedule_response(conn: &Connection, s: Schedule) -> anyhow::Result<ScheduleResponse> {
    let next_call_at = queries::open_attempt_for_schedule(conn, &s.id)?
        .map(|c| c.scheduled_at.format("%Y-%m-%d %H:%M:%S").to_string());
    Ok(ScheduleResponse {
        id: s.id,
        wake_time: s.wake_time.format("%H:%M").to_string(),
        timezone: s.timezone,
        weekdays: s.weekdays.to_names(),
        recurrence: s.recurrence.as_str().to_string(),
        call_retry: s.call_retry,
        advance_notice: s.advance_notice,
        active: s.active,
        next_call_at,
        created_at: s.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}

/// Loads a schedule owned by the caller; anyone else sees a 404.
fn owned_schedule(conn: &Connection, id: &str, user_id: &str) -> Result<Schedule, AppError> {
    match queries::get_schedule(conn, id)? {
        Some(s) if s.user_id == user_id => Ok(s),
        _ => Err(AppError::NotFound("schedule".to_string())),
    }
}

// POST /api/schedules
#[derive(Deserialize)]
pub struct CreateScheduleBody {
    pub wake_time: String,
    pub timezone: String,
    #[serde(default)]
    pub weekdays: Vec<String>,
    pub recurrence: Option<String>,
    pub call_retry: Option<bool>,
    pub advance_notice: Option<bool>,
}

struct ValidatedSchedule {
    wake_time: chrono::NaiveTime,
    timezone: String,
    weekdays: WeekdaySet,
    recurrence: Recurrence,
}

fn validate(
    wake_time: &str,
    timezone: &str,
    weekdays: &[String],
    recurrence: Option<&str>,
) -> Result<ValidatedSchedule, AppError> {
    let wake_time = schedule::parse_wake_time(wake_time)
        .map_err(|_| AppError::Validation("wake_time must be HH:MM".to_string()))?;
    schedule::parse_timezone(timezone)
        .map_err(|_| AppError::Validation(format!("unknown timezone: {timezone}")))?;
    let weekdays = WeekdaySet::from_names(weekdays)
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let recurrence = Recurrence::parse(recurrence.unwrap_or("recurring"));

    if recurrence == Recurrence::Recurring && weekdays.is_empty() {
        return Err(AppError::Validation(
            "recurring schedules need at least one weekday".to_string(),
        ));
    }

    Ok(ValidatedSchedule {
        wake_time,
        timezone: timezone.to_string(),
        weekdays,
        recurrence,
    })
}

pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateScheduleBody>,
) -> Result<Json<ScheduleResponse>, AppError> {
    let user = require_user(&state, &headers)?;
    if !user.phone_verified {
        return Err(AppError::Validation(
            "verify a phone number before scheduling calls".to_string(),
        ));
    }

    let valid = validate(
        &body.wake_time,
        &body.timezone,
        &body.weekdays,
        body.recurrence.as_deref(),
    )?;

    let now = Utc::now().naive_utc();
    let schedule = Schedule {
        id: Uuid::new_v4().to_string(),
        user_id: user.id,
        wake_time: valid.wake_time,
        timezone: valid.timezone,
        weekdays: valid.weekdays,
        recurrence: valid.recurrence,
        call_retry: body.call_retry.unwrap_or(true),
        advance_notice: body.advance_notice.unwrap_or(false),
        active: true,
        created_at: now,
        updated_at: now,
    };

    let response = {
        let db = state.db.lock().unwrap();
        queries::create_schedule(&db, &schedule)?;
        // Line up the first call right away instead of waiting a tick.
        scheduler::materialize_next(&db, &schedule, &now)?;
        schedule_response(&db, schedule)?
    };

    tracing::info!(schedule_id = %response.id, "schedule created");
    Ok(Json(response))
}

// GET /api/schedules
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ScheduleResponse>>, AppError> {
    let user = require_user(&state, &headers)?;

    let db = state.db.lock().unwrap();
    let schedules = queries::get_schedules_for_user(&db, &user.id)?;
    let mut response = Vec::with_capacity(schedules.len());
    for s in schedules {
        response.push(schedule_response(&db, s)?);
    }
    Ok(Json(response))
}

// GET /api/schedules/:id
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ScheduleResponse>, AppError> {
    let user = require_user(&state, &headers)?;

    let db = state.db.lock().unwrap();
    let schedule = owned_schedule(&db, &id, &user.id)?;
    Ok(Json(schedule_response(&db, schedule)?))
}

// PUT /api/schedules/:id
#[derive(Deserialize)]
pub struct UpdateScheduleBody {
    pub wake_time: Option<String>,
    pub timezone: Option<String>,
    pub weekdays: Option<Vec<String>>,
    pub recurrence: Option<String>,
    pub call_retry: Option<bool>,
    pub advance_notice: Option<bool>,
}

pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateScheduleBody>,
) -> Result<Json<ScheduleResponse>, AppError> {
    let user = require_user(&state, &headers)?;

    let db = state.db.lock().unwrap();
    let mut schedule = owned_schedule(&db, &id, &user.id)?;

    // Absent fields keep their current values.
    let wake_time = body
        .wake_time
        .unwrap_or_else(|| schedule.wake_time.format("%H:%M").to_string());
    let timezone = body.timezone.unwrap_or_else(|| schedule.timezone.clone());
    let weekdays = body.weekdays.unwrap_or_else(|| {
        schedule.weekdays.to_names().iter().map(|s| s.to_string()).collect()
    });
    let recurrence = body
        .recurrence
        .unwrap_or_else(|| schedule.recurrence.as_str().to_string());

    let valid = validate(&wake_time, &timezone, &weekdays, Some(&recurrence))?;

    schedule.wake_time = valid.wake_time;
    schedule.timezone = valid.timezone;
    schedule.weekdays = valid.weekdays;
    schedule.recurrence = valid.recurrence;
    schedule.call_retry = body.call_retry.unwrap_or(schedule.call_retry);
    schedule.advance_notice = body.advance_notice.unwrap_or(schedule.advance_notice);

    queries::update_schedule(&db, &schedule)?;

    // The old pending attempt reflects the old time; rebuild it.
    queries::delete_pending_calls_for_schedule(&db, &schedule.id)?;
    if schedule.active {
        scheduler::materialize_next(&db, &schedule, &Utc::now().naive_utc())?;
    }

    Ok(Json(schedule_response(&db, schedule)?))
}

// DELETE /api/schedules/:id
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = require_user(&state, &headers)?;

    let db = state.db.lock().unwrap();
    owned_schedule(&db, &id, &user.id)?;
    queries::delete_pending_calls_for_schedule(&db, &id)?;
    queries::delete_schedule(&db, &id)?;

    tracing::info!(schedule_id = %id, "schedule deleted");
    Ok(Json(serde_json::json!({"ok": true})))
}

// POST /api/schedules/:id/pause
pub async fn pause_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ScheduleResponse>, AppError> {
    let user = require_user(&state, &headers)?;

    let db = state.db.lock().unwrap();
    let mut schedule = owned_schedule(&db, &id, &user.id)?;
    queries::set_schedule_active(&db, &id, false)?;
    queries::delete_pending_calls_for_schedule(&db, &id)?;
    schedule.active = false;

    Ok(Json(schedule_response(&db, schedule)?))
}

// POST /api/schedules/:id/resume
pub async fn resume_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ScheduleResponse>, AppError> {
    let user = require_user(&state, &headers)?;

    let db = state.db.lock().unwrap();
    let mut schedule = owned_schedule(&db, &id, &user.id)?;
    queries::set_schedule_active(&db, &id, true)?;
    schedule.active = true;
    scheduler::materialize_next(&db, &schedule, &Utc::now().naive_utc())?;

    Ok(Json(schedule_response(&db, schedule)?))
}
