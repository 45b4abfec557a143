use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use reveille::config::AppConfig;
use reveille::db;
use reveille::handlers;
use reveille::services::messaging::email::LogEmailProvider;
use reveille::services::messaging::twilio::TwilioSmsProvider;
use reveille::services::scheduler;
use reveille::services::script::groq::GroqScripts;
use reveille::services::script::template::TemplateScripts;
use reveille::services::script::ScriptProvider;
use reveille::services::telephony::twilio::TwilioCallProvider;
use reveille::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let scripts: Box<dyn ScriptProvider> = match config.script_provider.as_str() {
        "groq" => {
            anyhow::ensure!(
                !config.groq_api_key.is_empty(),
                "GROQ_API_KEY must be set when SCRIPT_PROVIDER=groq"
            );
            tracing::info!("using Groq script provider (model: {})", config.groq_model);
            Box::new(GroqScripts::new(
                config.groq_api_key.clone(),
                config.groq_model.clone(),
            ))
        }
        _ => {
            tracing::info!("using template script provider");
            Box::new(TemplateScripts)
        }
    };
    let calls = TwilioCallProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_phone_number.clone(),
    );
    let sms = TwilioSmsProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_phone_number.clone(),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        calls: Box::new(calls),
        sms: Box::new(sms),
        email: Box::new(LogEmailProvider),
        scripts,
        paused: AtomicBool::new(false),
    });

    tokio::spawn(scheduler::run(state.clone()));

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhook/voice", post(handlers::webhook::voice_webhook))
        .route("/api/auth/request-code", post(handlers::auth::request_code))
        .route("/api/auth/verify", post(handlers::auth::verify))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/me", get(handlers::account::get_me))
        .route("/api/me", put(handlers::account::update_me))
        .route(
            "/api/me/phone/request-code",
            post(handlers::account::request_phone_code),
        )
        .route("/api/me/phone/verify", post(handlers::account::verify_phone))
        .route(
            "/api/me/personalization",
            put(handlers::account::update_personalization),
        )
        .route("/api/me/credits", get(handlers::account::get_credits))
        .route("/api/bundles", get(handlers::account::get_bundles))
        .route("/api/schedules", post(handlers::schedules::create_schedule))
        .route("/api/schedules", get(handlers::schedules::list_schedules))
        .route("/api/schedules/:id", get(handlers::schedules::get_schedule))
        .route("/api/schedules/:id", put(handlers::schedules::update_schedule))
        .route(
            "/api/schedules/:id",
            delete(handlers::schedules::delete_schedule),
        )
        .route(
            "/api/schedules/:id/pause",
            post(handlers::schedules::pause_schedule),
        )
        .route(
            "/api/schedules/:id/resume",
            post(handlers::schedules::resume_schedule),
        )
        .route("/api/calls", get(handlers::calls::get_history))
        .route("/api/admin/status", get(handlers::admin::get_status))
        .route("/api/admin/pause", post(handlers::admin::pause_dialing))
        .route("/api/admin/resume", post(handlers::admin::resume_dialing))
        .route("/api/admin/credits", post(handlers::admin::grant_credits))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
