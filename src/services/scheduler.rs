use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDateTime, Utc};
use rusqlite::Connection;

use crate::config::AppConfig;
use crate::db::queries;
use crate::models::{failure, CallAttempt, CallStatus, Personalization, Schedule, User};
use crate::services::recurrence;
use crate::services::script::{self, ScriptContext};
use crate::services::telephony;
use crate::state::AppState;

const MAX_PLACEMENTS_PER_TICK: i64 = 10;

#[derive(Debug, Default, PartialEq)]
pub struct TickSummary {
    pub notices_sent: usize,
    pub calls_placed: usize,
    pub calls_failed: usize,
    pub reconciled: usize,
    pub materialized: usize,
}

impl TickSummary {
    pub fn is_quiet(&self) -> bool {
        *self == TickSummary::default()
    }
}

/// Background loop. One pass every `scheduler_tick_secs`; a failed pass
/// is logged and the next one starts fresh.
pub async fn run(state: Arc<AppState>) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(state.config.scheduler_tick_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        match tick(&state, Utc::now().naive_utc()).await {
            Ok(summary) if !summary.is_quiet() => {
                tracing::info!(
                    notices = summary.notices_sent,
                    placed = summary.calls_placed,
                    failed = summary.calls_failed,
                    reconciled = summary.reconciled,
                    materialized = summary.materialized,
                    "scheduler tick"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!("scheduler tick failed: {e:#}"),
        }
    }
}

/// One scheduler pass at the given UTC instant. Every step is
/// idempotent, so overlapping runs and restarts cannot double-call.
pub async fn tick(state: &AppState, now: NaiveDateTime) -> anyhow::Result<TickSummary> {
    let mut summary = TickSummary::default();
    let paused = state.paused.load(Ordering::SeqCst);

    if !paused {
        summary.notices_sent = send_advance_notices(state, &now).await?;
        let (placed, failed) = place_due_calls(state, &now).await?;
        summary.calls_placed = placed;
        summary.calls_failed = failed;
    }

    summary.reconciled = reconcile_stuck_calls(state, &now)?;
    summary.materialized = materialize_missing_attempts(state, &now)?;
    housekeeping(state);

    Ok(summary)
}

// ── Advance notices ──

async fn send_advance_notices(state: &AppState, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let due = {
        let db = state.db.lock().unwrap();
        queries::notices_due(&db, now, state.config.advance_notice_minutes)?
    };

    let mut sent = 0;
    for notice in due {
        let local = recurrence::fmt_local_time(&notice.scheduled_at, &notice.timezone);
        let body = format!("Your wake-up call rings at {local}. Answer to start the day.");

        match state.sms.send_sms(&notice.phone, &body).await {
            Ok(()) => {
                let db = state.db.lock().unwrap();
                queries::mark_notice_sent(&db, &notice.call_id)?;
                sent += 1;
            }
            // Left unmarked: retried next tick until the window closes.
            Err(e) => tracing::warn!(call_id = %notice.call_id, "advance notice failed: {e:#}"),
        }
    }
    Ok(sent)
}

// ── Call placement ──

struct Placement {
    call: CallAttempt,
    schedule: Schedule,
    user: User,
}

async fn place_due_calls(state: &AppState, now: &NaiveDateTime) -> anyhow::Result<(usize, usize)> {
    let due = {
        let db = state.db.lock().unwrap();
        queries::due_call_ids(&db, now, MAX_PLACEMENTS_PER_TICK)?
    };

    let mut placed = 0;
    let mut failed = 0;
    for call_id in due {
        // Claim first: the CAS update makes this tick the only dialer.
        let placement = {
            let db = state.db.lock().unwrap();
            match claim_placement(&db, &state.config, &call_id)? {
                Some(p) => p,
                None => continue,
            }
        };

        match dial(state, &placement).await {
            Ok(sid) => {
                let db = state.db.lock().unwrap();
                queries::mark_ringing(&db, &placement.call.id, &sid)?;
                tracing::info!(
                    call_id = %placement.call.id,
                    sid = %sid,
                    attempt = placement.call.attempt,
                    "wake call dialing"
                );
                placed += 1;
            }
            Err(e) => {
                tracing::warn!(call_id = %placement.call.id, "dial failed: {e:#}");
                let db = state.db.lock().unwrap();
                finalize_attempt(
                    &db,
                    &state.config,
                    &placement.call.id,
                    CallStatus::Failed,
                    None,
                    None,
                    Some(failure::PROVIDER_ERROR),
                )?;
                failed += 1;
            }
        }
    }
    Ok((placed, failed))
}

/// Claims a due row and loads everything a dial needs. Rows that can
/// never dial (gone schedule, missing phone, empty balance) are failed
/// in place and yield None.
fn claim_placement(
    conn: &Connection,
    config: &AppConfig,
    call_id: &str,
) -> anyhow::Result<Option<Placement>> {
    if !queries::claim_call(conn, call_id)? {
        return Ok(None);
    }
    let Some(call) = queries::get_call(conn, call_id)? else {
        return Ok(None);
    };

    let schedule = queries::get_schedule(conn, &call.schedule_id)?;
    let schedule = match schedule {
        Some(s) if s.active => s,
        _ => {
            // Deleted or paused between materialization and now.
            finalize_attempt(
                conn,
                config,
                call_id,
                CallStatus::Failed,
                None,
                None,
                Some(failure::SCHEDULE_INACTIVE),
            )?;
            return Ok(None);
        }
    };

    let user = match queries::get_user_by_id(conn, &call.user_id)? {
        Some(u) if u.phone.is_some() && u.phone_verified => u,
        _ => {
            finalize_attempt(
                conn,
                config,
                call_id,
                CallStatus::Failed,
                None,
                None,
                Some(failure::NO_PHONE),
            )?;
            return Ok(None);
        }
    };

    // One credit per occurrence, charged when the first attempt dials.
    // Retries of the same morning are free.
    if call.attempt == 1 && !queries::adjust_credits(conn, &user.id, -1, "wake_call")? {
        finalize_attempt(
            conn,
            config,
            call_id,
            CallStatus::Failed,
            None,
            None,
            Some(failure::NO_CREDITS),
        )?;
        return Ok(None);
    }

    Ok(Some(Placement {
        call,
        schedule,
        user,
    }))
}

async fn dial(state: &AppState, placement: &Placement) -> anyhow::Result<String> {
    let personalization = placement
        .user
        .personalization
        .as_deref()
        .and_then(|json| Personalization::from_json(json).ok())
        .unwrap_or_default();

    let local_time =
        recurrence::fmt_local_time(&placement.call.scheduled_at, &placement.schedule.timezone);
    let ctx = ScriptContext {
        first_name: placement.user.first_name().unwrap_or_default(),
        local_time: &local_time,
        weekday: weekday_full_name(placement.call.occurrence.weekday()),
        personalization: &personalization,
    };

    let script = match state.scripts.wake_script(&ctx).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("script provider failed, using template: {e:#}");
            script::template::render(&ctx)
        }
    };

    let twiml = telephony::voice_twiml(&script, personalization.voice.twiml_voice());
    let callback = format!(
        "{}/webhook/voice?call_id={}",
        state.config.public_url, placement.call.id
    );
    let phone = placement.user.phone.as_deref().unwrap_or_default();

    state.calls.place_call(phone, &twiml, &callback).await
}

fn weekday_full_name(day: chrono::Weekday) -> &'static str {
    match day {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}

// ── Finalization ──

/// Closes out an attempt and lines up whatever comes next: a retry row
/// for missed or failed attempts with retries left, the next occurrence
/// for recurring schedules, deactivation for one-shots. Shared by the
/// status webhook and the reconciler; the guarded terminal update makes
/// a second finalization of the same attempt a no-op.
pub fn finalize_attempt(
    conn: &Connection,
    config: &AppConfig,
    call_id: &str,
    status: CallStatus,
    duration_secs: Option<i64>,
    recording_url: Option<&str>,
    failure_reason: Option<&str>,
) -> anyhow::Result<Option<CallAttempt>> {
    let Some(call) = queries::get_call(conn, call_id)? else {
        return Ok(None);
    };
    if !queries::finish_call(conn, call_id, status, duration_secs, recording_url, failure_reason)? {
        return Ok(None);
    }

    tracing::info!(
        call_id = %call_id,
        status = status.as_str(),
        attempt = call.attempt,
        "call finished"
    );

    let Some(schedule) = queries::get_schedule(conn, &call.schedule_id)? else {
        return Ok(None);
    };
    if !schedule.active {
        return Ok(None);
    }

    // Missed and failed attempts walk the retry ladder first. A balance
    // failure is excluded: redialing will not mint credits.
    let retryable = status != CallStatus::Answered
        && schedule.call_retry
        && call.attempt < config.max_call_attempts
        && failure_reason != Some(failure::NO_CREDITS);

    let now = Utc::now().naive_utc();
    if retryable {
        let delay = Duration::minutes(config.retry_delay_minutes * call.attempt as i64);
        let retry = CallAttempt::fresh(
            &schedule,
            call.occurrence,
            call.attempt + 1,
            now + delay,
        );
        if queries::insert_call_attempt(conn, &retry)? {
            return Ok(Some(retry));
        }
        return Ok(None);
    }

    advance_schedule(conn, &schedule, &now)
}

/// Moves a schedule past a settled occurrence: one-shots switch off,
/// recurring schedules get their next occurrence materialized.
fn advance_schedule(
    conn: &Connection,
    schedule: &Schedule,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<CallAttempt>> {
    if schedule.recurrence == crate::models::Recurrence::Once {
        queries::set_schedule_active(conn, &schedule.id, false)?;
        return Ok(None);
    }
    materialize_next(conn, schedule, now)
}

/// Inserts the pending first attempt for the next firing of `schedule`
/// strictly after `now`. The unique occurrence key absorbs duplicates.
pub fn materialize_next(
    conn: &Connection,
    schedule: &Schedule,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<CallAttempt>> {
    let Some(next) = recurrence::next_occurrence(schedule, now)? else {
        tracing::warn!(schedule_id = %schedule.id, "no upcoming occurrence found");
        return Ok(None);
    };

    let attempt = CallAttempt::fresh(schedule, next.occurrence, 1, next.at_utc);
    if queries::insert_call_attempt(conn, &attempt)? {
        tracing::debug!(
            schedule_id = %schedule.id,
            occurrence = %next.occurrence,
            at = %next.at_utc,
            "materialized next wake call"
        );
        return Ok(Some(attempt));
    }
    Ok(None)
}

// ── Reconciliation ──

/// Flushes attempts whose status callback never arrived. Anything still
/// dialing or ringing past the ring timeout counts as missed.
fn reconcile_stuck_calls(state: &AppState, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let cutoff = *now - Duration::minutes(state.config.ring_timeout_minutes);
    let db = state.db.lock().unwrap();
    let stuck = queries::stuck_call_ids(&db, &cutoff)?;

    let mut reconciled = 0;
    for call_id in stuck {
        tracing::warn!(call_id = %call_id, "no status callback, marking missed");
        finalize_attempt(
            &db,
            &state.config,
            &call_id,
            CallStatus::Missed,
            None,
            None,
            Some(failure::RING_TIMEOUT),
        )?;
        reconciled += 1;
    }
    Ok(reconciled)
}

/// Self-healing sweep: every active schedule must own exactly one open
/// attempt. A crash between finalize and materialize would otherwise
/// strand a schedule forever.
fn materialize_missing_attempts(state: &AppState, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let db = state.db.lock().unwrap();
    let schedules = queries::get_active_schedules(&db)?;

    let mut materialized = 0;
    for schedule in schedules {
        if queries::open_attempt_for_schedule(&db, &schedule.id)?.is_none()
            && materialize_next(&db, &schedule, now)?.is_some()
        {
            materialized += 1;
        }
    }
    Ok(materialized)
}

fn housekeeping(state: &AppState) {
    let db = state.db.lock().unwrap();
    if let Err(e) = queries::purge_expired_sessions(&db) {
        tracing::warn!("session purge failed: {e:#}");
    }
    if let Err(e) = queries::purge_expired_otps(&db) {
        tracing::warn!("otp purge failed: {e:#}");
    }
    if let Err(e) = queries::cleanup_otp_windows(&db) {
        tracing::warn!("otp window cleanup failed: {e:#}");
    }
}
