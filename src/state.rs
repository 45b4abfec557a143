use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::messaging::{EmailProvider, SmsProvider};
use crate::services::script::ScriptProvider;
use crate::services::telephony::CallProvider;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub calls: Box<dyn CallProvider>,
    pub sms: Box<dyn SmsProvider>,
    pub email: Box<dyn EmailProvider>,
    pub scripts: Box<dyn ScriptProvider>,
    /// When set, the scheduler skips dialing. Webhooks still land so
    /// in-flight calls resolve normally.
    pub paused: AtomicBool,
}
