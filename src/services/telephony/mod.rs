pub mod twilio;

use async_trait::async_trait;

/// Outbound voice call driver. Returns the provider's call id so the
/// status callback can be matched back to our attempt row.
#[async_trait]
pub trait CallProvider: Send + Sync {
    async fn place_call(
        &self,
        to: &str,
        twiml: &str,
        status_callback: &str,
    ) -> anyhow::Result<String>;
}

/// Builds the TwiML document spoken when the callee picks up.
pub fn voice_twiml(script: &str, voice: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response><Say voice=\"{}\">{}</Say></Response>",
        xml_escape(voice),
        xml_escape(script)
    )
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twiml_wraps_script_in_say() {
        let twiml = voice_twiml("Good morning, Alex.", "Polly.Joanna");
        assert!(twiml.starts_with("<?xml"));
        assert!(twiml.contains("<Say voice=\"Polly.Joanna\">Good morning, Alex.</Say>"));
    }

    #[test]
    fn test_twiml_escapes_markup_in_script() {
        let twiml = voice_twiml("Rise & shine, it's <you>", "Polly.Brian");
        assert!(twiml.contains("Rise &amp; shine, it&apos;s &lt;you&gt;"));
        assert!(!twiml.contains("<you>"));
    }
}
