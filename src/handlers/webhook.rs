use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use crate::db::queries;
use crate::models::CallStatus;
use crate::services::scheduler;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub call_id: Option<String>,
}

fn validate_twilio_signature(
    auth_token: &str,
    signature: &str,
    url: &str,
    params: &[(&str, &str)],
) -> bool {
    // Data to sign: URL + params concatenated in key order
    let mut data = url.to_string();
    let mut sorted_params = params.to_vec();
    sorted_params.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in &sorted_params {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = match Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(data.as_bytes());
    let result = mac.finalize().into_bytes();
    let expected = base64::engine::general_purpose::STANDARD.encode(result);

    expected == signature
}

fn form_value<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
    form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

// POST /webhook/voice
//
// Twilio call progress callback. Intermediate events are acknowledged
// and dropped; terminal ones close out the attempt and line up whatever
// comes next.
pub async fn voice_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
    Form(form): Form<Vec<(String, String)>>,
) -> Response {
    let call_sid = form_value(&form, "CallSid").unwrap_or("");
    let call_status = form_value(&form, "CallStatus").unwrap_or("");

    tracing::info!(sid = %call_sid, status = %call_status, "voice status callback");

    // Validate Twilio signature (skipped in dev mode, when no auth token is set)
    if !state.config.twilio_auth_token.is_empty() {
        let signature = headers
            .get("x-twilio-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty() {
            tracing::warn!("missing X-Twilio-Signature header");
            return (StatusCode::FORBIDDEN, "Missing signature").into_response();
        }

        // Reconstruct the callback URL Twilio signed, query string
        // included; use X-Forwarded-Proto/Host when behind a proxy
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("https");
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get("host"))
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let url = match &query.call_id {
            Some(id) => format!("{proto}://{host}/webhook/voice?call_id={id}"),
            None => format!("{proto}://{host}/webhook/voice"),
        };

        let params: Vec<(&str, &str)> = form
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        if !validate_twilio_signature(&state.config.twilio_auth_token, signature, &url, &params) {
            tracing::warn!("invalid Twilio signature");
            return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    // Terminal status mapping; everything else is progress noise.
    let (status, failure_reason) = match call_status {
        "completed" => (CallStatus::Answered, None),
        "no-answer" | "busy" => (CallStatus::Missed, None),
        "failed" | "canceled" => (CallStatus::Failed, Some(call_status)),
        _ => return twiml_response(),
    };

    let duration_secs = form_value(&form, "CallDuration").and_then(|d| d.parse::<i64>().ok());
    let recording_url = form_value(&form, "RecordingUrl");

    {
        let db = state.db.lock().unwrap();

        // Our own id rides the callback URL; the sid covers callbacks
        // that raced the dial response.
        let call = match &query.call_id {
            Some(id) => queries::get_call(&db, id),
            None => queries::get_call_by_provider_sid(&db, call_sid),
        };

        let call = match call {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!(sid = %call_sid, "callback for unknown call");
                return twiml_response();
            }
            Err(e) => {
                tracing::error!("callback lookup failed: {e:#}");
                return twiml_response();
            }
        };

        if let Err(e) = scheduler::finalize_attempt(
            &db,
            &state.config,
            &call.id,
            status,
            duration_secs,
            recording_url,
            failure_reason,
        ) {
            tracing::error!(call_id = %call.id, "finalize failed: {e:#}");
        }
    }

    twiml_response()
}

fn twiml_response() -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        "<Response></Response>",
    )
        .into_response()
}
