use chrono::{NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// A user's wake-up call definition: wall-clock time in an IANA zone,
/// the weekdays it applies to, and how it repeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub user_id: String,
    pub wake_time: NaiveTime,
    pub timezone: String,
    pub weekdays: WeekdaySet,
    pub recurrence: Recurrence,
    pub call_retry: bool,
    pub advance_notice: bool,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Recurring,
    Once,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Recurring => "recurring",
            Recurrence::Once => "once",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "once" => Recurrence::Once,
            _ => Recurrence::Recurring,
        }
    }
}

/// Set of weekdays a schedule fires on, kept in Mon..Sun order.
/// Stored and exchanged as lowercase three-letter names ("mon".."sun").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeekdaySet(Vec<Weekday>);

const DAY_ORDER: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

impl WeekdaySet {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> anyhow::Result<Self> {
        let mut days = Vec::new();
        for name in names {
            let day = parse_weekday(name.as_ref())?;
            if !days.contains(&day) {
                days.push(day);
            }
        }
        days.sort_by_key(|d| DAY_ORDER.iter().position(|o| o == d));
        Ok(WeekdaySet(days))
    }

    /// Parses the CSV form used in the database ("mon,wed,fri").
    pub fn from_csv(s: &str) -> anyhow::Result<Self> {
        if s.trim().is_empty() {
            return Ok(WeekdaySet::default());
        }
        let names: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        Self::from_names(&names)
    }

    pub fn to_csv(&self) -> String {
        self.to_names().join(",")
    }

    pub fn to_names(&self) -> Vec<&'static str> {
        self.0.iter().map(|d| weekday_name(*d)).collect()
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0.contains(&day)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for WeekdaySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WeekdaySet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        WeekdaySet::from_names(&names).map_err(serde::de::Error::custom)
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

pub fn parse_weekday(s: &str) -> anyhow::Result<Weekday> {
    match s.to_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        _ => Err(anyhow::anyhow!("invalid weekday: {s}")),
    }
}

/// Parses a wall-clock wake time in "HH:MM" form.
pub fn parse_wake_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| anyhow::anyhow!("invalid time format: {s}"))
}

/// Validates that a zone name is known to the bundled tz database.
pub fn parse_timezone(s: &str) -> anyhow::Result<chrono_tz::Tz> {
    s.parse::<chrono_tz::Tz>()
        .map_err(|_| anyhow::anyhow!("unknown timezone: {s}"))
}

impl Schedule {
    /// True if this schedule may fire on the given weekday. An empty set
    /// means "any day" and is only legal on one-time schedules.
    pub fn fires_on(&self, day: Weekday) -> bool {
        self.weekdays.is_empty() || self.weekdays.contains(day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekday_set_from_names() {
        let set = WeekdaySet::from_names(&["fri", "mon", "mon", "wed"]).unwrap();
        assert_eq!(set.to_csv(), "mon,wed,fri");
        assert!(set.contains(Weekday::Mon));
        assert!(!set.contains(Weekday::Tue));
    }

    #[test]
    fn test_weekday_set_rejects_unknown_day() {
        assert!(WeekdaySet::from_names(&["funday"]).is_err());
    }

    #[test]
    fn test_weekday_set_csv_round_trip() {
        let set = WeekdaySet::from_csv("sat,sun").unwrap();
        assert_eq!(set.to_csv(), "sat,sun");
        assert!(WeekdaySet::from_csv("").unwrap().is_empty());
    }

    #[test]
    fn test_weekday_set_case_insensitive() {
        let set = WeekdaySet::from_names(&["MON", "Tue"]).unwrap();
        assert_eq!(set.to_csv(), "mon,tue");
    }

    #[test]
    fn test_parse_wake_time() {
        assert_eq!(
            parse_wake_time("06:30").unwrap(),
            NaiveTime::from_hms_opt(6, 30, 0).unwrap()
        );
        assert!(parse_wake_time("25:00").is_err());
        assert!(parse_wake_time("not a time").is_err());
    }

    #[test]
    fn test_parse_timezone() {
        assert!(parse_timezone("America/New_York").is_ok());
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn test_recurrence_parse() {
        assert_eq!(Recurrence::parse("once"), Recurrence::Once);
        assert_eq!(Recurrence::parse("recurring"), Recurrence::Recurring);
        assert_eq!(Recurrence::parse("garbage"), Recurrence::Recurring);
    }
}
