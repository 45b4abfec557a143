use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub phone: Option<String>,
    pub phone_verified: bool,
    pub display_name: Option<String>,
    /// Personalization JSON; parsed on demand via `Personalization::from_json`.
    pub personalization: Option<String>,
    pub credits: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    /// First name used in call scripts, falling back to nothing rather
    /// than guessing from the email address.
    pub fn first_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

/// Checks the shape of an E.164 number: leading +, 8 to 15 digits.
pub fn valid_e164(phone: &str) -> bool {
    let Some(rest) = phone.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&rest.len()) && rest.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_e164() {
        assert!(valid_e164("+15551234567"));
        assert!(valid_e164("+447911123456"));
        assert!(!valid_e164("15551234567"));
        assert!(!valid_e164("+1555"));
        assert!(!valid_e164("+1555123456789012345"));
        assert!(!valid_e164("+1555abc4567"));
    }

    fn user_named(name: Option<&str>) -> User {
        let now = chrono::Utc::now().naive_utc();
        User {
            id: "u1".to_string(),
            email: "a@b.c".to_string(),
            phone: None,
            phone_verified: false,
            display_name: name.map(|n| n.to_string()),
            personalization: None,
            credits: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_first_name() {
        assert_eq!(user_named(Some("Ada Lovelace")).first_name(), Some("Ada"));
        assert_eq!(user_named(Some("Ada")).first_name(), Some("Ada"));
        assert_eq!(user_named(Some("  ")).first_name(), None);
        assert_eq!(user_named(None).first_name(), None);
    }
}
