use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::{ScriptContext, ScriptProvider};

const SYSTEM_PROMPT: &str = "You write very short spoken wake-up call scripts, 2-4 sentences, \
read aloud over the phone the moment someone answers. Plain spoken text only: no stage \
directions, no markdown, no emoji. Stay in character for the persona you are given.";

pub struct GroqScripts {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GroqScripts {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ScriptProvider for GroqScripts {
    async fn wake_script(&self, ctx: &ScriptContext<'_>) -> anyhow::Result<String> {
        let user_prompt = format!(
            "Write the wake-up call for {name}. It is {time} on {day}.\n{context}",
            name = if ctx.first_name.is_empty() {
                "the listener (name unknown)"
            } else {
                ctx.first_name
            },
            time = ctx.local_time,
            day = ctx.weekday,
            context = ctx.personalization.to_prompt(),
        );

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": 0.7,
        });

        let resp = self
            .client
            .post("https://api.groq.com/openai/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call Groq API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Groq response")?;

        if !status.is_success() {
            anyhow::bail!("Groq API error ({}): {}", status, data);
        }

        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("missing content in Groq response"))
    }
}
