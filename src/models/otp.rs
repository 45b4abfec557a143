use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    EmailLogin,
    PhoneVerify,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::EmailLogin => "email_login",
            OtpPurpose::PhoneVerify => "phone_verify",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "phone_verify" => OtpPurpose::PhoneVerify,
            _ => OtpPurpose::EmailLogin,
        }
    }
}

/// A one-time passcode bound to a destination (email address or E.164
/// phone number). Codes are single-use and die after too many wrong
/// guesses or expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpCode {
    pub id: i64,
    pub destination: String,
    pub purpose: OtpPurpose,
    pub code: String,
    pub attempts: i32,
    pub consumed: bool,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purpose_round_trip() {
        assert_eq!(
            OtpPurpose::parse(OtpPurpose::EmailLogin.as_str()),
            OtpPurpose::EmailLogin
        );
        assert_eq!(
            OtpPurpose::parse(OtpPurpose::PhoneVerify.as_str()),
            OtpPurpose::PhoneVerify
        );
    }
}
