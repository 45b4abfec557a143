use serde::{Deserialize, Serialize};

/// User-selected call content: what they are getting up for, what makes
/// mornings hard, and which voice persona delivers the call. Stored as a
/// JSON column on the user row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Personalization {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub struggle: String,
    #[serde(default)]
    pub voice: VoicePersona,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoicePersona {
    DrillSergeant,
    #[default]
    Gentle,
    Motivator,
    Butler,
}

impl VoicePersona {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoicePersona::DrillSergeant => "drill_sergeant",
            VoicePersona::Gentle => "gentle",
            VoicePersona::Motivator => "motivator",
            VoicePersona::Butler => "butler",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "drill_sergeant" => VoicePersona::DrillSergeant,
            "motivator" => VoicePersona::Motivator,
            "butler" => VoicePersona::Butler,
            _ => VoicePersona::Gentle,
        }
    }

    /// Twilio TTS voice used in the `<Say>` verb.
    pub fn twiml_voice(&self) -> &'static str {
        match self {
            VoicePersona::DrillSergeant => "Polly.Matthew",
            VoicePersona::Gentle => "Polly.Joanna",
            VoicePersona::Motivator => "Polly.Brian",
            VoicePersona::Butler => "Polly.Amy",
        }
    }

    /// One-line delivery direction handed to the script generator.
    pub fn style(&self) -> &'static str {
        match self {
            VoicePersona::DrillSergeant => {
                "barking drill sergeant: loud, clipped sentences, zero sympathy"
            }
            VoicePersona::Gentle => "gentle coach: warm, patient, encouraging",
            VoicePersona::Motivator => "high-energy motivational speaker: big, punchy, urgent",
            VoicePersona::Butler => "impeccably polite English butler: formal, dry, courteous",
        }
    }
}

impl Default for Personalization {
    fn default() -> Self {
        Self {
            goal: String::new(),
            struggle: String::new(),
            voice: VoicePersona::default(),
        }
    }
}

impl Personalization {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Context block handed to the LLM script provider.
    pub fn to_prompt(&self) -> String {
        let mut lines = vec![format!("Speak as a {}.", self.voice.style())];
        if !self.goal.is_empty() {
            lines.push(format!("They are waking up early because: {}.", self.goal));
        }
        if !self.struggle.is_empty() {
            lines.push(format!(
                "What usually keeps them in bed: {}.",
                self.struggle
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_partial_uses_defaults() {
        let p = Personalization::from_json(r#"{"goal":"train for a marathon"}"#).unwrap();
        assert_eq!(p.goal, "train for a marathon");
        assert_eq!(p.struggle, "");
        assert_eq!(p.voice, VoicePersona::Gentle);
    }

    #[test]
    fn test_from_json_full() {
        let p = Personalization::from_json(
            r#"{"goal":"gym at 6","struggle":"snoozing","voice":"drill_sergeant"}"#,
        )
        .unwrap();
        assert_eq!(p.voice, VoicePersona::DrillSergeant);
        assert_eq!(p.voice.twiml_voice(), "Polly.Matthew");
    }

    #[test]
    fn test_from_json_rejects_unknown_voice() {
        assert!(Personalization::from_json(r#"{"voice":"screamo"}"#).is_err());
    }

    #[test]
    fn test_to_prompt_mentions_goal_and_struggle() {
        let p = Personalization {
            goal: "ship the launch".to_string(),
            struggle: "late-night doomscrolling".to_string(),
            voice: VoicePersona::Motivator,
        };
        let prompt = p.to_prompt();
        assert!(prompt.contains("ship the launch"));
        assert!(prompt.contains("late-night doomscrolling"));
        assert!(prompt.contains("motivational"));
    }

    #[test]
    fn test_json_round_trip() {
        let p = Personalization {
            goal: "run".to_string(),
            struggle: String::new(),
            voice: VoicePersona::Butler,
        };
        let back = Personalization::from_json(&p.to_json()).unwrap();
        assert_eq!(back, p);
    }
}
