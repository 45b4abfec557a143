use async_trait::async_trait;

use super::{ScriptContext, ScriptProvider};
use crate::models::VoicePersona;

/// Canned persona scripts. The default provider, and the fallback the
/// scheduler reaches for when an LLM provider errors out mid-dial.
pub struct TemplateScripts;

pub fn render(ctx: &ScriptContext<'_>) -> String {
    let name = if ctx.first_name.is_empty() {
        "there"
    } else {
        ctx.first_name
    };
    let goal = &ctx.personalization.goal;

    let mut script = match ctx.personalization.voice {
        VoicePersona::DrillSergeant => format!(
            "{name}! It is {time} on {day}. Out of bed, now! Feet on the floor. Move, move, move!",
            time = ctx.local_time,
            day = ctx.weekday,
        ),
        VoicePersona::Gentle => format!(
            "Good morning, {name}. It's {time} on {day}. Time to start your day, nice and easy. You've got this.",
            time = ctx.local_time,
            day = ctx.weekday,
        ),
        VoicePersona::Motivator => format!(
            "{name}! It's {time} on {day} and today is YOURS. Get up, get moving, and go make it count!",
            time = ctx.local_time,
            day = ctx.weekday,
        ),
        VoicePersona::Butler => format!(
            "Good morning, {name}. It is {time} on {day}. Might I suggest rising now? Your day awaits.",
            time = ctx.local_time,
            day = ctx.weekday,
        ),
    };

    if !goal.is_empty() {
        script.push(' ');
        script.push_str(&match ctx.personalization.voice {
            VoicePersona::DrillSergeant => format!("You said you wanted to {goal}. Prove it!"),
            VoicePersona::Gentle => format!("Remember why you're up early: {goal}."),
            VoicePersona::Motivator => format!("Remember the mission: {goal}. Let's go!"),
            VoicePersona::Butler => format!("May I remind you of your stated aim: {goal}."),
        });
    }

    script
}

#[async_trait]
impl ScriptProvider for TemplateScripts {
    async fn wake_script(&self, ctx: &ScriptContext<'_>) -> anyhow::Result<String> {
        Ok(render(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Personalization;

    fn ctx<'a>(p: &'a Personalization) -> ScriptContext<'a> {
        ScriptContext {
            first_name: "Alex",
            local_time: "7:00 AM",
            weekday: "Monday",
            personalization: p,
        }
    }

    #[test]
    fn test_render_mentions_name_time_and_day() {
        let p = Personalization::default();
        let script = render(&ctx(&p));
        assert!(script.contains("Alex"));
        assert!(script.contains("7:00 AM"));
        assert!(script.contains("Monday"));
    }

    #[test]
    fn test_render_includes_goal_when_set() {
        let p = Personalization {
            goal: "catch the 7:40 train".to_string(),
            ..Default::default()
        };
        assert!(render(&ctx(&p)).contains("catch the 7:40 train"));
    }

    #[test]
    fn test_render_handles_missing_name() {
        let p = Personalization::default();
        let c = ScriptContext {
            first_name: "",
            local_time: "6:30 AM",
            weekday: "Friday",
            personalization: &p,
        };
        assert!(render(&c).contains("there"));
    }

    #[test]
    fn test_personas_produce_distinct_scripts() {
        let gentle = Personalization::default();
        let drill = Personalization {
            voice: crate::models::VoicePersona::DrillSergeant,
            ..Default::default()
        };
        assert_ne!(render(&ctx(&gentle)), render(&ctx(&drill)));
    }
}
