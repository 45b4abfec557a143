use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{valid_e164, Bundle, OtpPurpose, Personalization, User};
use crate::services::auth;
use crate::state::AppState;

use super::require_user;

// GET /api/me
#[derive(Serialize)]
pub struct ProfileResponse {
    id: String,
    email: String,
    phone: Option<String>,
    phone_verified: bool,
    display_name: Option<String>,
    personalization: Personalization,
    credits: i64,
}

fn profile(user: User) -> ProfileResponse {
    let personalization = user
        .personalization
        .as_deref()
        .and_then(|json| Personalization::from_json(json).ok())
        .unwrap_or_default();
    ProfileResponse {
        id: user.id,
        email: user.email,
        phone: user.phone,
        phone_verified: user.phone_verified,
        display_name: user.display_name,
        personalization,
        credits: user.credits,
    }
}

pub async fn get_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = require_user(&state, &headers)?;
    Ok(Json(profile(user)))
}

// PUT /api/me
#[derive(Deserialize)]
pub struct UpdateMeBody {
    pub display_name: String,
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpdateMeBody>,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = require_user(&state, &headers)?;

    let name = body.display_name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(AppError::Validation("display name must be 1-100 characters".to_string()));
    }

    let updated = {
        let db = state.db.lock().unwrap();
        queries::update_display_name(&db, &user.id, name)?;
        queries::get_user_by_id(&db, &user.id)?
    };
    updated
        .map(|u| Json(profile(u)))
        .ok_or_else(|| AppError::NotFound("user".to_string()))
}

// POST /api/me/phone/request-code
#[derive(Deserialize)]
pub struct PhoneCodeBody {
    pub phone: String,
}

pub async fn request_phone_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PhoneCodeBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_user(&state, &headers)?;

    let phone = body.phone.trim().to_string();
    if !valid_e164(&phone) {
        return Err(AppError::Validation(
            "phone must be E.164, like +15551234567".to_string(),
        ));
    }

    auth::request_otp(&state, &phone, OtpPurpose::PhoneVerify).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

// POST /api/me/phone/verify
#[derive(Deserialize)]
pub struct PhoneVerifyBody {
    pub phone: String,
    pub code: String,
}

pub async fn verify_phone(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PhoneVerifyBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = require_user(&state, &headers)?;
    let phone = body.phone.trim().to_string();

    let db = state.db.lock().unwrap();
    auth::verify_otp(&db, &state.config, &phone, OtpPurpose::PhoneVerify, &body.code)?;
    queries::set_user_phone(&db, &user.id, &phone)?;

    tracing::info!(user_id = %user.id, "phone verified");
    Ok(Json(serde_json::json!({"ok": true, "phone": phone})))
}

// PUT /api/me/personalization
pub async fn update_personalization(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Personalization>,
) -> Result<Json<Personalization>, AppError> {
    let user = require_user(&state, &headers)?;

    if body.goal.len() > 300 || body.struggle.len() > 300 {
        return Err(AppError::Validation(
            "goal and struggle must be at most 300 characters".to_string(),
        ));
    }

    let db = state.db.lock().unwrap();
    queries::update_personalization(&db, &user.id, &body.to_json())?;
    Ok(Json(body))
}

// GET /api/me/credits
#[derive(Serialize)]
pub struct CreditEventResponse {
    delta: i64,
    reason: String,
    created_at: String,
}

#[derive(Serialize)]
pub struct CreditsResponse {
    credits: i64,
    events: Vec<CreditEventResponse>,
}

pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CreditsResponse>, AppError> {
    let user = require_user(&state, &headers)?;

    let events = {
        let db = state.db.lock().unwrap();
        queries::get_credit_events(&db, &user.id, 50)?
    };

    Ok(Json(CreditsResponse {
        credits: user.credits,
        events: events
            .into_iter()
            .map(|e| CreditEventResponse {
                delta: e.delta,
                reason: e.reason,
                created_at: e.created_at,
            })
            .collect(),
    }))
}

// GET /api/bundles
#[derive(Serialize)]
pub struct BundleResponse {
    id: &'static str,
    credits: i64,
    price_cents: i64,
}

pub async fn get_bundles() -> Json<Vec<BundleResponse>> {
    Json(
        Bundle::ALL
            .iter()
            .map(|b| BundleResponse {
                id: b.as_str(),
                credits: b.credits(),
                price_cents: b.price_cents(),
            })
            .collect(),
    )
}
