use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    /// Externally reachable base URL, used for Twilio webhook callbacks.
    pub public_url: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    /// "template" or "groq".
    pub script_provider: String,
    pub groq_api_key: String,
    pub groq_model: String,
    pub scheduler_tick_secs: u64,
    pub max_call_attempts: i32,
    pub retry_delay_minutes: i64,
    pub advance_notice_minutes: i64,
    pub ring_timeout_minutes: i64,
    pub otp_ttl_minutes: i64,
    pub otp_max_attempts: i32,
    pub otp_hourly_limit: i64,
    pub session_ttl_days: i64,
    pub signup_credits: i64,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "reveille.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            script_provider: env::var("SCRIPT_PROVIDER").unwrap_or_else(|_| "template".to_string()),
            groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            groq_model: env::var("GROQ_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            scheduler_tick_secs: env_or("SCHEDULER_TICK_SECS", 30),
            max_call_attempts: env_or("MAX_CALL_ATTEMPTS", 3),
            retry_delay_minutes: env_or("RETRY_DELAY_MINUTES", 5),
            advance_notice_minutes: env_or("ADVANCE_NOTICE_MINUTES", 10),
            ring_timeout_minutes: env_or("RING_TIMEOUT_MINUTES", 5),
            otp_ttl_minutes: env_or("OTP_TTL_MINUTES", 10),
            otp_max_attempts: env_or("OTP_MAX_ATTEMPTS", 5),
            otp_hourly_limit: env_or("OTP_HOURLY_LIMIT", 5),
            session_ttl_days: env_or("SESSION_TTL_DAYS", 30),
            signup_credits: env_or("SIGNUP_CREDITS", 3),
        }
    }
}
