pub mod groq;
pub mod template;

use async_trait::async_trait;

use crate::models::Personalization;

/// Everything the generator knows about the call it is writing.
pub struct ScriptContext<'a> {
    pub first_name: &'a str,
    /// Local wall-clock time of the call, e.g. "7:00 AM".
    pub local_time: &'a str,
    /// Full weekday name, e.g. "Monday".
    pub weekday: &'a str,
    pub personalization: &'a Personalization,
}

#[async_trait]
pub trait ScriptProvider: Send + Sync {
    async fn wake_script(&self, ctx: &ScriptContext<'_>) -> anyhow::Result<String>;
}
