use anyhow::Context;
use async_trait::async_trait;

use super::CallProvider;

pub struct TwilioCallProvider {
    account_sid: String,
    auth_token: String,
    from_number: String,
    /// Seconds to let the phone ring before Twilio gives up.
    ring_seconds: u32,
    client: reqwest::Client,
}

impl TwilioCallProvider {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        Self {
            account_sid,
            auth_token,
            from_number,
            ring_seconds: 30,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CallProvider for TwilioCallProvider {
    async fn place_call(
        &self,
        to: &str,
        twiml: &str,
        status_callback: &str,
    ) -> anyhow::Result<String> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
            self.account_sid
        );
        let timeout = self.ring_seconds.to_string();

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to),
                ("From", &self.from_number),
                ("Twiml", twiml),
                ("Timeout", &timeout),
                ("StatusCallback", status_callback),
                ("StatusCallbackEvent", "ringing"),
                ("StatusCallbackEvent", "answered"),
                ("StatusCallbackEvent", "completed"),
            ])
            .send()
            .await
            .context("failed to reach Twilio")?
            .error_for_status()
            .context("Twilio API returned error")?;

        let body: serde_json::Value = response
            .json()
            .await
            .context("failed to parse Twilio response")?;

        body.get("sid")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Twilio response missing call sid"))
    }
}
