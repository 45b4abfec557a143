use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Lifecycle of one call attempt:
/// pending -> dialing -> ringing -> answered | missed | failed.
/// A retried occurrence gets a fresh attempt row back at pending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Dialing,
    Ringing,
    Answered,
    Missed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Dialing => "dialing",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Missed => "missed",
            CallStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "dialing" => CallStatus::Dialing,
            "ringing" => CallStatus::Ringing,
            "answered" => CallStatus::Answered,
            "missed" => CallStatus::Missed,
            "failed" => CallStatus::Failed,
            _ => CallStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Answered | CallStatus::Missed | CallStatus::Failed
        )
    }

    /// Legal forward transitions; everything else is a stale or duplicate
    /// event and must be ignored by the caller.
    pub fn can_become(&self, next: CallStatus) -> bool {
        match (self, next) {
            (CallStatus::Pending, CallStatus::Dialing) => true,
            (CallStatus::Dialing, CallStatus::Ringing) => true,
            (CallStatus::Dialing | CallStatus::Ringing, s) if s.is_terminal() => true,
            _ => false,
        }
    }
}

/// One attempt of one wake-up occurrence. Terminal rows double as the
/// user-visible call history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAttempt {
    pub id: String,
    pub schedule_id: String,
    pub user_id: String,
    /// Local civil date of the wake-up in the schedule's zone; together
    /// with `attempt` this uniquely identifies the row.
    pub occurrence: NaiveDate,
    pub attempt: i32,
    /// UTC instant this attempt should fire.
    pub scheduled_at: NaiveDateTime,
    pub status: CallStatus,
    pub provider_sid: Option<String>,
    pub duration_secs: Option<i64>,
    pub recording_url: Option<String>,
    pub failure_reason: Option<String>,
    pub notice_sent: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CallAttempt {
    /// New pending attempt for one firing of a schedule.
    pub fn fresh(
        schedule: &super::Schedule,
        occurrence: NaiveDate,
        attempt: i32,
        scheduled_at: NaiveDateTime,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            user_id: schedule.user_id.clone(),
            occurrence,
            attempt,
            scheduled_at,
            status: CallStatus::Pending,
            provider_sid: None,
            duration_secs: None,
            recording_url: None,
            failure_reason: None,
            notice_sent: false,
            created_at: now,
            updated_at: now,
        }
    }
}

pub mod failure {
    pub const NO_CREDITS: &str = "no_credits";
    pub const NO_PHONE: &str = "no_phone";
    pub const PROVIDER_ERROR: &str = "provider_error";
    pub const RING_TIMEOUT: &str = "ring_timeout";
    pub const SCHEDULE_INACTIVE: &str = "schedule_inactive";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            CallStatus::Pending,
            CallStatus::Dialing,
            CallStatus::Ringing,
            CallStatus::Answered,
            CallStatus::Missed,
            CallStatus::Failed,
        ] {
            assert_eq!(CallStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_unknown_status_falls_back_to_pending() {
        assert_eq!(CallStatus::parse("exploded"), CallStatus::Pending);
    }

    #[test]
    fn test_forward_transitions() {
        assert!(CallStatus::Pending.can_become(CallStatus::Dialing));
        assert!(CallStatus::Dialing.can_become(CallStatus::Ringing));
        assert!(CallStatus::Dialing.can_become(CallStatus::Failed));
        assert!(CallStatus::Ringing.can_become(CallStatus::Answered));
        assert!(CallStatus::Ringing.can_become(CallStatus::Missed));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        // Terminal states never move again.
        assert!(!CallStatus::Answered.can_become(CallStatus::Missed));
        assert!(!CallStatus::Failed.can_become(CallStatus::Dialing));
        // No skipping the claim step.
        assert!(!CallStatus::Pending.can_become(CallStatus::Ringing));
        assert!(!CallStatus::Pending.can_become(CallStatus::Answered));
        // No regressions.
        assert!(!CallStatus::Ringing.can_become(CallStatus::Dialing));
    }

    #[test]
    fn test_terminal_set() {
        assert!(CallStatus::Answered.is_terminal());
        assert!(CallStatus::Missed.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert!(!CallStatus::Pending.is_terminal());
        assert!(!CallStatus::Dialing.is_terminal());
        assert!(!CallStatus::Ringing.is_terminal());
    }
}
