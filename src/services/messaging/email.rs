use async_trait::async_trait;

use super::EmailProvider;

/// Logs outbound mail instead of delivering it. Stands in until a real
/// mail integration is wired up; login codes show up in the server log.
pub struct LogEmailProvider;

#[async_trait]
impl EmailProvider for LogEmailProvider {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(to = %to, subject = %subject, "email (log only): {body}");
        Ok(())
    }
}
