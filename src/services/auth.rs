use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{OtpPurpose, Session, User};
use crate::state::AppState;

pub fn generate_code() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000))
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    let well_formed = email.len() <= 254
        && !email.contains(char::is_whitespace)
        && email.split_once('@').is_some_and(|(l, d)| !l.is_empty() && d.contains('.'));
    if !well_formed {
        return Err(AppError::Validation("invalid email address".to_string()));
    }
    Ok(email)
}

/// Issues a fresh code for the destination and delivers it. The hourly
/// per-destination cap is checked before anything is stored.
pub async fn request_otp(
    state: &AppState,
    destination: &str,
    purpose: OtpPurpose,
) -> Result<(), AppError> {
    let code = generate_code();
    {
        let db = state.db.lock().unwrap();
        let requests = queries::increment_otp_requests(&db, destination)?;
        if requests > state.config.otp_hourly_limit {
            tracing::warn!(destination = %destination, "otp request limit hit");
            return Err(AppError::RateLimited(
                "too many codes requested, try again later".to_string(),
            ));
        }
        let expires_at = Utc::now().naive_utc() + Duration::minutes(state.config.otp_ttl_minutes);
        queries::create_otp(&db, destination, purpose, &code, &expires_at)?;
    }

    let ttl = state.config.otp_ttl_minutes;
    let delivery = match purpose {
        OtpPurpose::EmailLogin => {
            let body =
                format!("Your wake-up call login code is {code}. It expires in {ttl} minutes.");
            state
                .email
                .send_email(destination, "Your login code", &body)
                .await
        }
        OtpPurpose::PhoneVerify => {
            let body = format!("Your verification code is {code}. It expires in {ttl} minutes.");
            state.sms.send_sms(destination, &body).await
        }
    };

    delivery.map_err(|e| {
        tracing::error!("code delivery failed: {e:#}");
        AppError::Messaging("could not deliver code".to_string())
    })
}

/// Checks a submitted code against the live one. Wrong guesses burn an
/// attempt; hitting the cap consumes the code so it can never verify.
pub fn verify_otp(
    conn: &Connection,
    config: &AppConfig,
    destination: &str,
    purpose: OtpPurpose,
    code: &str,
) -> Result<(), AppError> {
    let Some(otp) = queries::get_active_otp(conn, destination, purpose)? else {
        return Err(AppError::Unauthorized);
    };

    if otp.code != code {
        let attempts = queries::increment_otp_attempts(conn, otp.id)?;
        if attempts >= config.otp_max_attempts {
            queries::consume_otp(conn, otp.id)?;
            return Err(AppError::RateLimited(
                "too many wrong codes, request a new one".to_string(),
            ));
        }
        return Err(AppError::Unauthorized);
    }

    queries::consume_otp(conn, otp.id)?;
    Ok(())
}

/// Looks up the account for a verified email login, creating it with the
/// signup credit grant on first sight.
pub fn login_or_signup(
    conn: &Connection,
    config: &AppConfig,
    email: &str,
) -> anyhow::Result<User> {
    if let Some(user) = queries::get_user_by_email(conn, email)? {
        return Ok(user);
    }

    let now = Utc::now().naive_utc();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        phone: None,
        phone_verified: false,
        display_name: None,
        personalization: None,
        credits: 0,
        created_at: now,
        updated_at: now,
    };
    queries::create_user(conn, &user)?;
    // Balance flows through the ledger so signup credits show up there too.
    queries::adjust_credits(conn, &user.id, config.signup_credits, "signup")?;
    tracing::info!(user_id = %user.id, "new account created");

    queries::get_user_by_id(conn, &user.id)?
        .ok_or_else(|| anyhow::anyhow!("user row missing after insert"))
}

pub fn create_session(
    conn: &Connection,
    config: &AppConfig,
    user_id: &str,
) -> anyhow::Result<Session> {
    let now = Utc::now().naive_utc();
    let session = Session {
        token: generate_token(),
        user_id: user_id.to_string(),
        created_at: now,
        expires_at: now + Duration::days(config.session_ttl_days),
    };
    queries::insert_session(conn, &session)?;
    Ok(session)
}
