use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{
    CallAttempt, CallStatus, OtpCode, OtpPurpose, Recurrence, Schedule, Session, User, WeekdaySet,
};

const DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_dt(dt: &NaiveDateTime) -> String {
    dt.format(DT_FORMAT).to_string()
}

fn parse_dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DT_FORMAT).unwrap_or_else(|_| Utc::now().naive_utc())
}

fn now_str() -> String {
    fmt_dt(&Utc::now().naive_utc())
}

// ── Users ──

pub fn create_user(conn: &Connection, user: &User) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, phone, phone_verified, display_name, personalization, credits, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            user.id,
            user.email,
            user.phone,
            user.phone_verified as i32,
            user.display_name,
            user.personalization,
            user.credits,
            fmt_dt(&user.created_at),
            fmt_dt(&user.updated_at),
        ],
    )?;
    Ok(())
}

const USER_COLUMNS: &str =
    "id, email, phone, phone_verified, display_name, personalization, credits, created_at, updated_at";

fn parse_user_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let created_at_str: String = row.get(7)?;
    let updated_at_str: String = row.get(8)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        phone: row.get(2)?,
        phone_verified: row.get::<_, i32>(3)? != 0,
        display_name: row.get(4)?,
        personalization: row.get(5)?,
        credits: row.get(6)?,
        created_at: parse_dt(&created_at_str),
        updated_at: parse_dt(&updated_at_str),
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<User>> {
    let result = conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        parse_user_row,
    );

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> anyhow::Result<Option<User>> {
    let result = conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
        params![email],
        parse_user_row,
    );

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn set_user_phone(conn: &Connection, user_id: &str, phone: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE users SET phone = ?1, phone_verified = 1, updated_at = ?2 WHERE id = ?3",
        params![phone, now_str(), user_id],
    )?;
    Ok(())
}

pub fn update_personalization(conn: &Connection, user_id: &str, json: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE users SET personalization = ?1, updated_at = ?2 WHERE id = ?3",
        params![json, now_str(), user_id],
    )?;
    Ok(())
}

pub fn update_display_name(conn: &Connection, user_id: &str, name: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE users SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
        params![name, now_str(), user_id],
    )?;
    Ok(())
}

/// Applies a credit delta and records it in the ledger. A debit that would
/// take the balance negative is refused and leaves no ledger entry.
pub fn adjust_credits(
    conn: &Connection,
    user_id: &str,
    delta: i64,
    reason: &str,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE users SET credits = credits + ?1, updated_at = ?2
         WHERE id = ?3 AND credits + ?1 >= 0",
        params![delta, now_str(), user_id],
    )?;
    if count == 0 {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO credit_events (user_id, delta, reason) VALUES (?1, ?2, ?3)",
        params![user_id, delta, reason],
    )?;
    Ok(true)
}

pub struct CreditEvent {
    pub delta: i64,
    pub reason: String,
    pub created_at: String,
}

pub fn get_credit_events(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<CreditEvent>> {
    let mut stmt = conn.prepare(
        "SELECT delta, reason, created_at FROM credit_events
         WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![user_id, limit], |row| {
        Ok(CreditEvent {
            delta: row.get(0)?,
            reason: row.get(1)?,
            created_at: row.get(2)?,
        })
    })?;

    let mut events = vec![];
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

// ── Sessions ──

pub fn insert_session(conn: &Connection, session: &Session) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            session.token,
            session.user_id,
            fmt_dt(&session.created_at),
            fmt_dt(&session.expires_at),
        ],
    )?;
    Ok(())
}

pub fn get_session_user(conn: &Connection, token: &str) -> anyhow::Result<Option<User>> {
    let result = conn.query_row(
        "SELECT u.id, u.email, u.phone, u.phone_verified, u.display_name, u.personalization, u.credits, u.created_at, u.updated_at
         FROM sessions s JOIN users u ON u.id = s.user_id
         WHERE s.token = ?1 AND s.expires_at > ?2",
        params![token, now_str()],
        parse_user_row,
    );

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_session(conn: &Connection, token: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(count > 0)
}

pub fn purge_expired_sessions(conn: &Connection) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![now_str()],
    )?;
    Ok(count)
}

// ── OTP codes ──

/// Stores a fresh code, invalidating any live code for the same
/// destination and purpose. Only the most recent code can verify.
pub fn create_otp(
    conn: &Connection,
    destination: &str,
    purpose: OtpPurpose,
    code: &str,
    expires_at: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE otp_codes SET consumed = 1 WHERE destination = ?1 AND purpose = ?2 AND consumed = 0",
        params![destination, purpose.as_str()],
    )?;
    conn.execute(
        "INSERT INTO otp_codes (destination, purpose, code, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![destination, purpose.as_str(), code, fmt_dt(expires_at)],
    )?;
    Ok(())
}

pub fn get_active_otp(
    conn: &Connection,
    destination: &str,
    purpose: OtpPurpose,
) -> anyhow::Result<Option<OtpCode>> {
    let result = conn.query_row(
        "SELECT id, destination, purpose, code, attempts, consumed, expires_at, created_at
         FROM otp_codes
         WHERE destination = ?1 AND purpose = ?2 AND consumed = 0 AND expires_at > ?3
         ORDER BY id DESC LIMIT 1",
        params![destination, purpose.as_str(), now_str()],
        |row| {
            let purpose_str: String = row.get(2)?;
            let expires_at_str: String = row.get(6)?;
            let created_at_str: String = row.get(7)?;
            Ok(OtpCode {
                id: row.get(0)?,
                destination: row.get(1)?,
                purpose: OtpPurpose::parse(&purpose_str),
                code: row.get(3)?,
                attempts: row.get(4)?,
                consumed: row.get::<_, i32>(5)? != 0,
                expires_at: parse_dt(&expires_at_str),
                created_at: parse_dt(&created_at_str),
            })
        },
    );

    match result {
        Ok(otp) => Ok(Some(otp)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn increment_otp_attempts(conn: &Connection, id: i64) -> anyhow::Result<i32> {
    conn.execute(
        "UPDATE otp_codes SET attempts = attempts + 1 WHERE id = ?1",
        params![id],
    )?;
    let attempts: i32 = conn.query_row(
        "SELECT attempts FROM otp_codes WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(attempts)
}

pub fn consume_otp(conn: &Connection, id: i64) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE otp_codes SET consumed = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub fn purge_expired_otps(conn: &Connection) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM otp_codes WHERE expires_at <= ?1",
        params![now_str()],
    )?;
    Ok(count)
}

// ── OTP request limits ──

fn current_hour_window() -> String {
    Utc::now().format("%Y-%m-%d %H:00:00").to_string()
}

pub fn increment_otp_requests(conn: &Connection, destination: &str) -> anyhow::Result<i64> {
    let window = current_hour_window();

    conn.execute(
        "INSERT INTO otp_requests (destination, request_count, window_start)
         VALUES (?1, 1, ?2)
         ON CONFLICT(destination, window_start) DO UPDATE SET request_count = request_count + 1",
        params![destination, window],
    )?;

    let count: i64 = conn.query_row(
        "SELECT request_count FROM otp_requests WHERE destination = ?1 AND window_start = ?2",
        params![destination, window],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn cleanup_otp_windows(conn: &Connection) -> anyhow::Result<()> {
    let cutoff = (Utc::now() - chrono::Duration::hours(2))
        .format("%Y-%m-%d %H:00:00")
        .to_string();
    conn.execute(
        "DELETE FROM otp_requests WHERE window_start < ?1",
        params![cutoff],
    )?;
    Ok(())
}

// ── Schedules ──

const SCHEDULE_COLUMNS: &str = "id, user_id, wake_time, timezone, weekdays, recurrence, call_retry, advance_notice, active, created_at, updated_at";

fn parse_schedule_row(row: &rusqlite::Row) -> anyhow::Result<Schedule> {
    let wake_time_str: String = row.get(2)?;
    let weekdays_str: String = row.get(4)?;
    let recurrence_str: String = row.get(5)?;
    let created_at_str: String = row.get(9)?;
    let updated_at_str: String = row.get(10)?;

    Ok(Schedule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        wake_time: crate::models::schedule::parse_wake_time(&wake_time_str)?,
        timezone: row.get(3)?,
        weekdays: WeekdaySet::from_csv(&weekdays_str)?,
        recurrence: Recurrence::parse(&recurrence_str),
        call_retry: row.get::<_, i32>(6)? != 0,
        advance_notice: row.get::<_, i32>(7)? != 0,
        active: row.get::<_, i32>(8)? != 0,
        created_at: parse_dt(&created_at_str),
        updated_at: parse_dt(&updated_at_str),
    })
}

pub fn create_schedule(conn: &Connection, schedule: &Schedule) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO schedules (id, user_id, wake_time, timezone, weekdays, recurrence, call_retry, advance_notice, active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            schedule.id,
            schedule.user_id,
            schedule.wake_time.format("%H:%M").to_string(),
            schedule.timezone,
            schedule.weekdays.to_csv(),
            schedule.recurrence.as_str(),
            schedule.call_retry as i32,
            schedule.advance_notice as i32,
            schedule.active as i32,
            fmt_dt(&schedule.created_at),
            fmt_dt(&schedule.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_schedule(conn: &Connection, id: &str) -> anyhow::Result<Option<Schedule>> {
    let result = conn.query_row(
        &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1 AND deleted = 0"),
        params![id],
        |row| Ok(parse_schedule_row(row)),
    );

    match result {
        Ok(schedule) => Ok(Some(schedule?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_schedules_for_user(conn: &Connection, user_id: &str) -> anyhow::Result<Vec<Schedule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules
         WHERE user_id = ?1 AND deleted = 0 ORDER BY created_at ASC"
    ))?;

    let rows = stmt.query_map(params![user_id], |row| Ok(parse_schedule_row(row)))?;

    let mut schedules = vec![];
    for row in rows {
        schedules.push(row??);
    }
    Ok(schedules)
}

pub fn update_schedule(conn: &Connection, schedule: &Schedule) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE schedules SET wake_time = ?1, timezone = ?2, weekdays = ?3, recurrence = ?4,
                call_retry = ?5, advance_notice = ?6, active = ?7, updated_at = ?8
         WHERE id = ?9 AND deleted = 0",
        params![
            schedule.wake_time.format("%H:%M").to_string(),
            schedule.timezone,
            schedule.weekdays.to_csv(),
            schedule.recurrence.as_str(),
            schedule.call_retry as i32,
            schedule.advance_notice as i32,
            schedule.active as i32,
            now_str(),
            schedule.id,
        ],
    )?;
    Ok(count > 0)
}

pub fn set_schedule_active(conn: &Connection, id: &str, active: bool) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE schedules SET active = ?1, updated_at = ?2 WHERE id = ?3 AND deleted = 0",
        params![active as i32, now_str(), id],
    )?;
    Ok(count > 0)
}

/// Soft delete. The row survives so call history keeps its foreign key,
/// but the schedule disappears from listings and the scheduler.
pub fn delete_schedule(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE schedules SET deleted = 1, active = 0, updated_at = ?1 WHERE id = ?2 AND deleted = 0",
        params![now_str(), id],
    )?;
    Ok(count > 0)
}

pub fn get_active_schedules(conn: &Connection) -> anyhow::Result<Vec<Schedule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE active = 1 AND deleted = 0"
    ))?;

    let rows = stmt.query_map([], |row| Ok(parse_schedule_row(row)))?;

    let mut schedules = vec![];
    for row in rows {
        schedules.push(row??);
    }
    Ok(schedules)
}

// ── Calls ──

const CALL_COLUMNS: &str = "id, schedule_id, user_id, occurrence, attempt, scheduled_at, status, provider_sid, duration_secs, recording_url, failure_reason, notice_sent, created_at, updated_at";

fn parse_call_row(row: &rusqlite::Row) -> anyhow::Result<CallAttempt> {
    let occurrence_str: String = row.get(3)?;
    let scheduled_at_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let created_at_str: String = row.get(12)?;
    let updated_at_str: String = row.get(13)?;

    let occurrence = chrono::NaiveDate::parse_from_str(&occurrence_str, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("bad occurrence date: {occurrence_str}"))?;

    Ok(CallAttempt {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        user_id: row.get(2)?,
        occurrence,
        attempt: row.get(4)?,
        scheduled_at: parse_dt(&scheduled_at_str),
        status: CallStatus::parse(&status_str),
        provider_sid: row.get(7)?,
        duration_secs: row.get(8)?,
        recording_url: row.get(9)?,
        failure_reason: row.get(10)?,
        notice_sent: row.get::<_, i32>(11)? != 0,
        created_at: parse_dt(&created_at_str),
        updated_at: parse_dt(&updated_at_str),
    })
}

/// Inserts an attempt row. The (schedule, occurrence, attempt) unique key
/// makes double materialization a silent no-op; returns whether a row
/// actually landed.
pub fn insert_call_attempt(conn: &Connection, call: &CallAttempt) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO calls (id, schedule_id, user_id, occurrence, attempt, scheduled_at, status, notice_sent, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            call.id,
            call.schedule_id,
            call.user_id,
            call.occurrence.format("%Y-%m-%d").to_string(),
            call.attempt,
            fmt_dt(&call.scheduled_at),
            call.status.as_str(),
            call.notice_sent as i32,
            fmt_dt(&call.created_at),
            fmt_dt(&call.updated_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_call(conn: &Connection, id: &str) -> anyhow::Result<Option<CallAttempt>> {
    let result = conn.query_row(
        &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
        params![id],
        |row| Ok(parse_call_row(row)),
    );

    match result {
        Ok(call) => Ok(Some(call?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_call_by_provider_sid(
    conn: &Connection,
    sid: &str,
) -> anyhow::Result<Option<CallAttempt>> {
    let result = conn.query_row(
        &format!("SELECT {CALL_COLUMNS} FROM calls WHERE provider_sid = ?1"),
        params![sid],
        |row| Ok(parse_call_row(row)),
    );

    match result {
        Ok(call) => Ok(Some(call?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn due_call_ids(
    conn: &Connection,
    now: &NaiveDateTime,
    limit: i64,
) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM calls WHERE status = 'pending' AND scheduled_at <= ?1
         ORDER BY scheduled_at ASC LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![fmt_dt(now), limit], |row| row.get::<_, String>(0))?;

    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Compare-and-swap claim. Exactly one caller wins the pending row; a
/// second scheduler racing a restart loses and moves on.
pub fn claim_call(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE calls SET status = 'dialing', updated_at = ?1 WHERE id = ?2 AND status = 'pending'",
        params![now_str(), id],
    )?;
    Ok(count > 0)
}

pub fn mark_ringing(conn: &Connection, id: &str, provider_sid: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE calls SET status = 'ringing', provider_sid = ?1, updated_at = ?2
         WHERE id = ?3 AND status = 'dialing'",
        params![provider_sid, now_str(), id],
    )?;
    Ok(count > 0)
}

/// Terminal transition, guarded so duplicate webhooks and the reconciler
/// cannot finalize the same attempt twice.
pub fn finish_call(
    conn: &Connection,
    id: &str,
    status: CallStatus,
    duration_secs: Option<i64>,
    recording_url: Option<&str>,
    failure_reason: Option<&str>,
) -> anyhow::Result<bool> {
    debug_assert!(status.is_terminal());
    let count = conn.execute(
        "UPDATE calls SET status = ?1, duration_secs = ?2, recording_url = ?3, failure_reason = ?4, updated_at = ?5
         WHERE id = ?6 AND status IN ('dialing', 'ringing')",
        params![
            status.as_str(),
            duration_secs,
            recording_url,
            failure_reason,
            now_str(),
            id
        ],
    )?;
    Ok(count > 0)
}

pub struct NoticeDue {
    pub call_id: String,
    pub phone: String,
    pub scheduled_at: NaiveDateTime,
    pub timezone: String,
}

/// First attempts inside the notice window on schedules that asked for a
/// heads-up SMS. `notice_sent` keeps later ticks from re-sending.
pub fn notices_due(
    conn: &Connection,
    now: &NaiveDateTime,
    lead_minutes: i64,
) -> anyhow::Result<Vec<NoticeDue>> {
    let horizon = *now + chrono::Duration::minutes(lead_minutes);
    let mut stmt = conn.prepare(
        "SELECT c.id, u.phone, c.scheduled_at, s.timezone
         FROM calls c
         JOIN schedules s ON s.id = c.schedule_id
         JOIN users u ON u.id = c.user_id
         WHERE c.status = 'pending' AND c.attempt = 1 AND c.notice_sent = 0
           AND s.advance_notice = 1 AND u.phone IS NOT NULL
           AND c.scheduled_at > ?1 AND c.scheduled_at <= ?2",
    )?;

    let rows = stmt.query_map(params![fmt_dt(now), fmt_dt(&horizon)], |row| {
        let scheduled_at_str: String = row.get(2)?;
        Ok(NoticeDue {
            call_id: row.get(0)?,
            phone: row.get(1)?,
            scheduled_at: parse_dt(&scheduled_at_str),
            timezone: row.get(3)?,
        })
    })?;

    let mut due = vec![];
    for row in rows {
        due.push(row?);
    }
    Ok(due)
}

pub fn mark_notice_sent(conn: &Connection, call_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE calls SET notice_sent = 1, updated_at = ?1 WHERE id = ?2",
        params![now_str(), call_id],
    )?;
    Ok(())
}

/// Attempts stuck in dialing or ringing past the cutoff. The status
/// callback never arrived and they need reconciling.
pub fn stuck_call_ids(conn: &Connection, cutoff: &NaiveDateTime) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM calls WHERE status IN ('dialing', 'ringing') AND updated_at <= ?1",
    )?;

    let rows = stmt.query_map(params![fmt_dt(cutoff)], |row| row.get::<_, String>(0))?;

    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

pub fn open_attempt_for_schedule(
    conn: &Connection,
    schedule_id: &str,
) -> anyhow::Result<Option<CallAttempt>> {
    let result = conn.query_row(
        &format!(
            "SELECT {CALL_COLUMNS} FROM calls
             WHERE schedule_id = ?1 AND status IN ('pending', 'dialing', 'ringing')
             ORDER BY scheduled_at ASC LIMIT 1"
        ),
        params![schedule_id],
        |row| Ok(parse_call_row(row)),
    );

    match result {
        Ok(call) => Ok(Some(call?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_pending_calls_for_schedule(
    conn: &Connection,
    schedule_id: &str,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM calls WHERE schedule_id = ?1 AND status = 'pending'",
        params![schedule_id],
    )?;
    Ok(count)
}

pub fn get_history_for_user(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<CallAttempt>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CALL_COLUMNS} FROM calls
         WHERE user_id = ?1 AND status IN ('answered', 'missed', 'failed')
         ORDER BY scheduled_at DESC, attempt DESC LIMIT ?2"
    ))?;

    let rows = stmt.query_map(params![user_id, limit], |row| Ok(parse_call_row(row)))?;

    let mut calls = vec![];
    for row in rows {
        calls.push(row??);
    }
    Ok(calls)
}

// ── Service stats ──

pub struct ServiceStats {
    pub users: i64,
    pub active_schedules: i64,
    pub open_calls: i64,
    pub calls_today: i64,
}

pub fn get_service_stats(conn: &Connection) -> anyhow::Result<ServiceStats> {
    let users: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .unwrap_or(0);

    let active_schedules: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM schedules WHERE active = 1 AND deleted = 0",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let open_calls: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM calls WHERE status IN ('pending', 'dialing', 'ringing')",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let today = Utc::now().format("%Y-%m-%d").to_string();
    let calls_today: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM calls WHERE status != 'pending' AND updated_at >= ?1",
            params![format!("{today} 00:00:00")],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(ServiceStats {
        users,
        active_schedules,
        open_calls,
        calls_today,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;
    use chrono::{Duration, NaiveDate, NaiveTime};
    use uuid::Uuid;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrations::run_migrations(&conn).unwrap();
        conn
    }

    fn test_user(conn: &Connection) -> User {
        let now = Utc::now().naive_utc();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: format!("{}@example.com", Uuid::new_v4()),
            phone: Some("+15551234567".to_string()),
            phone_verified: true,
            display_name: Some("Test".to_string()),
            personalization: None,
            credits: 3,
            created_at: now,
            updated_at: now,
        };
        create_user(conn, &user).unwrap();
        user
    }

    fn test_schedule(conn: &Connection, user_id: &str) -> Schedule {
        let now = Utc::now().naive_utc();
        let schedule = Schedule {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            wake_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            timezone: "America/New_York".to_string(),
            weekdays: WeekdaySet::from_csv("mon,tue,wed,thu,fri").unwrap(),
            recurrence: Recurrence::Recurring,
            call_retry: true,
            advance_notice: false,
            active: true,
            created_at: now,
            updated_at: now,
        };
        create_schedule(conn, &schedule).unwrap();
        schedule
    }

    fn test_call(conn: &Connection, schedule: &Schedule, attempt: i32) -> CallAttempt {
        let now = Utc::now().naive_utc();
        let call = CallAttempt {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            user_id: schedule.user_id.clone(),
            occurrence: NaiveDate::from_ymd_opt(2025, 6, 16).unwrap(),
            attempt,
            scheduled_at: now - Duration::minutes(1),
            status: CallStatus::Pending,
            provider_sid: None,
            duration_secs: None,
            recording_url: None,
            failure_reason: None,
            notice_sent: false,
            created_at: now,
            updated_at: now,
        };
        assert!(insert_call_attempt(conn, &call).unwrap());
        call
    }

    #[test]
    fn user_roundtrip_and_email_lookup() {
        let conn = test_conn();
        let user = test_user(&conn);

        let by_id = get_user_by_id(&conn, &user.id).unwrap().unwrap();
        assert_eq!(by_id.email, user.email);
        assert!(by_id.phone_verified);

        let by_email = get_user_by_email(&conn, &user.email).unwrap().unwrap();
        assert_eq!(by_email.id, user.id);

        assert!(get_user_by_email(&conn, "nobody@example.com")
            .unwrap()
            .is_none());
    }

    #[test]
    fn credits_never_go_negative() {
        let conn = test_conn();
        let user = test_user(&conn);

        assert!(adjust_credits(&conn, &user.id, -3, "wake_call").unwrap());
        assert!(!adjust_credits(&conn, &user.id, -1, "wake_call").unwrap());

        let after = get_user_by_id(&conn, &user.id).unwrap().unwrap();
        assert_eq!(after.credits, 0);

        let events = get_credit_events(&conn, &user.id, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].delta, -3);
    }

    #[test]
    fn session_expiry_is_enforced() {
        let conn = test_conn();
        let user = test_user(&conn);
        let now = Utc::now().naive_utc();

        let live = Session {
            token: "live-token".to_string(),
            user_id: user.id.clone(),
            created_at: now,
            expires_at: now + Duration::days(30),
        };
        let dead = Session {
            token: "dead-token".to_string(),
            user_id: user.id.clone(),
            created_at: now - Duration::days(31),
            expires_at: now - Duration::days(1),
        };
        insert_session(&conn, &live).unwrap();
        insert_session(&conn, &dead).unwrap();

        assert!(get_session_user(&conn, "live-token").unwrap().is_some());
        assert!(get_session_user(&conn, "dead-token").unwrap().is_none());

        assert_eq!(purge_expired_sessions(&conn).unwrap(), 1);
        assert!(delete_session(&conn, "live-token").unwrap());
        assert!(get_session_user(&conn, "live-token").unwrap().is_none());
    }

    #[test]
    fn fresh_otp_invalidates_previous() {
        let conn = test_conn();
        let expires = Utc::now().naive_utc() + Duration::minutes(10);

        create_otp(&conn, "a@example.com", OtpPurpose::EmailLogin, "111111", &expires).unwrap();
        create_otp(&conn, "a@example.com", OtpPurpose::EmailLogin, "222222", &expires).unwrap();

        let active = get_active_otp(&conn, "a@example.com", OtpPurpose::EmailLogin)
            .unwrap()
            .unwrap();
        assert_eq!(active.code, "222222");

        consume_otp(&conn, active.id).unwrap();
        assert!(get_active_otp(&conn, "a@example.com", OtpPurpose::EmailLogin)
            .unwrap()
            .is_none());
    }

    #[test]
    fn otp_request_window_counts_per_destination() {
        let conn = test_conn();

        assert_eq!(increment_otp_requests(&conn, "a@example.com").unwrap(), 1);
        assert_eq!(increment_otp_requests(&conn, "a@example.com").unwrap(), 2);
        assert_eq!(increment_otp_requests(&conn, "b@example.com").unwrap(), 1);
    }

    #[test]
    fn schedule_soft_delete_hides_but_keeps_history() {
        let conn = test_conn();
        let user = test_user(&conn);
        let schedule = test_schedule(&conn, &user.id);
        let call = test_call(&conn, &schedule, 1);
        claim_call(&conn, &call.id).unwrap();
        finish_call(&conn, &call.id, CallStatus::Answered, Some(42), None, None).unwrap();

        assert!(delete_schedule(&conn, &schedule.id).unwrap());
        assert!(get_schedule(&conn, &schedule.id).unwrap().is_none());
        assert!(get_schedules_for_user(&conn, &user.id).unwrap().is_empty());
        assert!(get_active_schedules(&conn).unwrap().is_empty());

        let history = get_history_for_user(&conn, &user.id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, CallStatus::Answered);
        assert_eq!(history[0].duration_secs, Some(42));

        // Second delete is a no-op.
        assert!(!delete_schedule(&conn, &schedule.id).unwrap());
    }

    #[test]
    fn duplicate_attempt_insert_is_ignored() {
        let conn = test_conn();
        let user = test_user(&conn);
        let schedule = test_schedule(&conn, &user.id);
        let call = test_call(&conn, &schedule, 1);

        let mut dup = call.clone();
        dup.id = Uuid::new_v4().to_string();
        assert!(!insert_call_attempt(&conn, &dup).unwrap());

        let open = open_attempt_for_schedule(&conn, &schedule.id)
            .unwrap()
            .unwrap();
        assert_eq!(open.id, call.id);
    }

    #[test]
    fn claim_is_exclusive() {
        let conn = test_conn();
        let user = test_user(&conn);
        let schedule = test_schedule(&conn, &user.id);
        let call = test_call(&conn, &schedule, 1);

        let due = due_call_ids(&conn, &Utc::now().naive_utc(), 10).unwrap();
        assert_eq!(due, vec![call.id.clone()]);

        assert!(claim_call(&conn, &call.id).unwrap());
        assert!(!claim_call(&conn, &call.id).unwrap());

        assert!(due_call_ids(&conn, &Utc::now().naive_utc(), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn finish_call_guards_terminal_states() {
        let conn = test_conn();
        let user = test_user(&conn);
        let schedule = test_schedule(&conn, &user.id);
        let call = test_call(&conn, &schedule, 1);

        claim_call(&conn, &call.id).unwrap();
        assert!(mark_ringing(&conn, &call.id, "CA123").unwrap());

        let by_sid = get_call_by_provider_sid(&conn, "CA123").unwrap().unwrap();
        assert_eq!(by_sid.id, call.id);

        assert!(finish_call(&conn, &call.id, CallStatus::Missed, None, None, None).unwrap());
        // Duplicate webhook delivery cannot flip the row again.
        assert!(!finish_call(&conn, &call.id, CallStatus::Answered, None, None, None).unwrap());

        let after = get_call(&conn, &call.id).unwrap().unwrap();
        assert_eq!(after.status, CallStatus::Missed);
    }

    #[test]
    fn stuck_calls_are_found_by_cutoff() {
        let conn = test_conn();
        let user = test_user(&conn);
        let schedule = test_schedule(&conn, &user.id);
        let call = test_call(&conn, &schedule, 1);
        claim_call(&conn, &call.id).unwrap();

        let future_cutoff = Utc::now().naive_utc() + Duration::minutes(10);
        let stuck = stuck_call_ids(&conn, &future_cutoff).unwrap();
        assert_eq!(stuck, vec![call.id.clone()]);

        let past_cutoff = Utc::now().naive_utc() - Duration::minutes(10);
        assert!(stuck_call_ids(&conn, &past_cutoff).unwrap().is_empty());
    }

    #[test]
    fn notices_due_respects_flags_and_window() {
        let conn = test_conn();
        let user = test_user(&conn);
        let now = Utc::now().naive_utc();

        let mut schedule = test_schedule(&conn, &user.id);
        schedule.advance_notice = true;
        update_schedule(&conn, &schedule).unwrap();

        let call = CallAttempt {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            user_id: user.id.clone(),
            occurrence: NaiveDate::from_ymd_opt(2025, 6, 16).unwrap(),
            attempt: 1,
            scheduled_at: now + Duration::minutes(5),
            status: CallStatus::Pending,
            provider_sid: None,
            duration_secs: None,
            recording_url: None,
            failure_reason: None,
            notice_sent: false,
            created_at: now,
            updated_at: now,
        };
        insert_call_attempt(&conn, &call).unwrap();

        let due = notices_due(&conn, &now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].call_id, call.id);
        assert_eq!(due[0].phone, "+15551234567");

        mark_notice_sent(&conn, &call.id).unwrap();
        assert!(notices_due(&conn, &now, 10).unwrap().is_empty());
    }
}
