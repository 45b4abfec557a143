use chrono::{Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::models::Schedule;

/// A concrete firing of a schedule: the local civil date it belongs to
/// and the UTC instant the call should go out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextFire {
    pub occurrence: NaiveDate,
    pub at_utc: NaiveDateTime,
}

// A single-weekday schedule fires at most 7 local days out; one extra
// day absorbs the timezone skew between the UTC clock and local dates.
const SCAN_DAYS: i64 = 8;

const GAP_PROBE_MINUTES: i64 = 15;

/// Resolves a wall-clock time on a local date to a UTC instant.
///
/// Spring-forward gaps (the wall time never happens) roll forward in
/// 15-minute steps to the first wall time that does exist that day, so
/// a 02:30 alarm on gap day rings at 03:00 rather than never. Fall-back
/// ambiguity (the wall time happens twice) takes the earlier instant.
pub fn resolve_local(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<NaiveDateTime> {
    let mut wall = date.and_time(time);
    loop {
        match tz.from_local_datetime(&wall) {
            LocalResult::Single(dt) => return Some(dt.naive_utc()),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.naive_utc()),
            LocalResult::None => {
                wall += Duration::minutes(GAP_PROBE_MINUTES);
                if wall.date() != date {
                    return None;
                }
            }
        }
    }
}

/// Next firing of `schedule` strictly after the UTC instant `after`.
///
/// Scans forward day by day in the schedule's own timezone, so weekday
/// filtering happens on local civil dates rather than UTC ones. Returns
/// None when no day in the scan window fires, which for a well-formed
/// schedule cannot happen.
pub fn next_occurrence(
    schedule: &Schedule,
    after: &NaiveDateTime,
) -> anyhow::Result<Option<NextFire>> {
    let tz = crate::models::schedule::parse_timezone(&schedule.timezone)?;
    let local_start = tz.from_utc_datetime(after).date_naive();

    for offset in 0..SCAN_DAYS {
        let date = local_start + Duration::days(offset);
        if !schedule.fires_on(date.weekday()) {
            continue;
        }
        if let Some(at_utc) = resolve_local(date, schedule.wake_time, tz) {
            if at_utc > *after {
                return Ok(Some(NextFire {
                    occurrence: date,
                    at_utc,
                }));
            }
        }
    }
    Ok(None)
}

/// Formats a UTC instant as local wall-clock time for user-facing text.
pub fn fmt_local_time(at_utc: &NaiveDateTime, timezone: &str) -> String {
    match timezone.parse::<Tz>() {
        Ok(tz) => tz.from_utc_datetime(at_utc).format("%-I:%M %p").to_string(),
        Err(_) => at_utc.format("%H:%M UTC").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Recurrence, WeekdaySet};
    use chrono::Utc;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn make_schedule(wake: &str, tz: &str, days: &str, recurrence: Recurrence) -> Schedule {
        let now = Utc::now().naive_utc();
        Schedule {
            id: "sched-1".to_string(),
            user_id: "user-1".to_string(),
            wake_time: time(wake),
            timezone: tz.to_string(),
            weekdays: WeekdaySet::from_csv(days).unwrap(),
            recurrence,
            call_retry: true,
            advance_notice: false,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_resolve_plain_summer_time() {
        // 2025-06-16 is a Monday; New York is on EDT (UTC-4).
        let utc = resolve_local(date("2025-06-16"), time("07:00"), chrono_tz::America::New_York);
        assert_eq!(utc, Some(dt("2025-06-16 11:00")));
    }

    #[test]
    fn test_resolve_spring_forward_gap() {
        // 2025-03-09: New York clocks jump 02:00 -> 03:00, so 02:30
        // never happens. First existing wall time is 03:00 EDT.
        let utc = resolve_local(date("2025-03-09"), time("02:30"), chrono_tz::America::New_York);
        assert_eq!(utc, Some(dt("2025-03-09 07:00")));
    }

    #[test]
    fn test_resolve_spring_forward_gap_london() {
        // 2025-03-30: London jumps 01:00 -> 02:00. 01:30 resolves to
        // 02:00 BST, which is 01:00 UTC.
        let utc = resolve_local(date("2025-03-30"), time("01:30"), chrono_tz::Europe::London);
        assert_eq!(utc, Some(dt("2025-03-30 01:00")));
    }

    #[test]
    fn test_resolve_fall_back_takes_earlier() {
        // 2025-11-02: New York repeats the 01:00 hour. The earlier
        // reading is still EDT, so 01:30 is 05:30 UTC not 06:30.
        let utc = resolve_local(date("2025-11-02"), time("01:30"), chrono_tz::America::New_York);
        assert_eq!(utc, Some(dt("2025-11-02 05:30")));
    }

    #[test]
    fn test_resolve_unaffected_time_on_transition_day() {
        // A 07:00 alarm on gap day is past the transition, plain EDT.
        let utc = resolve_local(date("2025-03-09"), time("07:00"), chrono_tz::America::New_York);
        assert_eq!(utc, Some(dt("2025-03-09 11:00")));
    }

    #[test]
    fn test_next_occurrence_same_day_when_time_ahead() {
        let schedule = make_schedule("07:00", "America/New_York", "mon,tue,wed,thu,fri", Recurrence::Recurring);
        // Monday 06:00 local = 10:00 UTC; the 07:00 call is still ahead.
        let next = next_occurrence(&schedule, &dt("2025-06-16 10:00")).unwrap().unwrap();
        assert_eq!(next.occurrence, date("2025-06-16"));
        assert_eq!(next.at_utc, dt("2025-06-16 11:00"));
    }

    #[test]
    fn test_next_occurrence_is_strictly_after() {
        let schedule = make_schedule("07:00", "America/New_York", "mon", Recurrence::Recurring);
        // Exactly at the Monday fire instant: today no longer counts.
        let next = next_occurrence(&schedule, &dt("2025-06-16 11:00")).unwrap().unwrap();
        assert_eq!(next.occurrence, date("2025-06-23"));
        assert_eq!(next.at_utc, dt("2025-06-23 11:00"));
    }

    #[test]
    fn test_next_occurrence_skips_to_configured_weekday() {
        let schedule = make_schedule("07:00", "America/New_York", "sat,sun", Recurrence::Recurring);
        // From Monday the next firing day is Saturday 2025-06-21.
        let next = next_occurrence(&schedule, &dt("2025-06-16 12:00")).unwrap().unwrap();
        assert_eq!(next.occurrence, date("2025-06-21"));
    }

    #[test]
    fn test_next_occurrence_weekday_judged_in_local_zone() {
        // 2025-06-14 09:00 UTC is already Saturday 21:00 in Auckland
        // (UTC+12), so a sat 22:00 schedule fires an hour later.
        let schedule = make_schedule("22:00", "Pacific/Auckland", "sat", Recurrence::Recurring);
        let next = next_occurrence(&schedule, &dt("2025-06-14 09:00")).unwrap().unwrap();
        assert_eq!(next.occurrence, date("2025-06-14"));
        assert_eq!(next.at_utc, dt("2025-06-14 10:00"));
    }

    #[test]
    fn test_next_occurrence_once_fires_any_day() {
        let schedule = make_schedule("07:00", "America/New_York", "", Recurrence::Once);
        // Empty weekday set on a one-shot: the very next 07:00 local.
        let next = next_occurrence(&schedule, &dt("2025-06-16 12:00")).unwrap().unwrap();
        assert_eq!(next.occurrence, date("2025-06-17"));
        assert_eq!(next.at_utc, dt("2025-06-17 11:00"));
    }

    #[test]
    fn test_next_occurrence_across_spring_forward() {
        // Saturday 2025-03-08 fires at 02:30 EST (07:30 UTC). Sunday
        // is gap day: the 02:30 slot shifts to 03:00 EDT (07:00 UTC).
        // The day is delayed half an hour on the wall clock, not lost.
        let schedule = make_schedule("02:30", "America/New_York", "sat,sun", Recurrence::Recurring);
        let sat = next_occurrence(&schedule, &dt("2025-03-08 00:00")).unwrap().unwrap();
        assert_eq!(sat.occurrence, date("2025-03-08"));
        assert_eq!(sat.at_utc, dt("2025-03-08 07:30"));

        let sun = next_occurrence(&schedule, &sat.at_utc).unwrap().unwrap();
        assert_eq!(sun.occurrence, date("2025-03-09"));
        assert_eq!(sun.at_utc, dt("2025-03-09 07:00"));
    }

    #[test]
    fn test_next_occurrence_across_fall_back_no_double_fire() {
        // 01:30 on repeat day resolves to the earlier instant only;
        // advancing past it moves to the next configured day, never a
        // second 01:30 the same civil date.
        let schedule = make_schedule("01:30", "America/New_York", "sat,sun", Recurrence::Recurring);
        let sun = next_occurrence(&schedule, &dt("2025-11-02 00:00")).unwrap().unwrap();
        assert_eq!(sun.occurrence, date("2025-11-02"));
        assert_eq!(sun.at_utc, dt("2025-11-02 05:30"));

        let next = next_occurrence(&schedule, &sun.at_utc).unwrap().unwrap();
        assert_eq!(next.occurrence, date("2025-11-08"));
    }

    #[test]
    fn test_next_occurrence_bad_timezone_errors() {
        let schedule = make_schedule("07:00", "Mars/Olympus_Mons", "mon", Recurrence::Recurring);
        assert!(next_occurrence(&schedule, &dt("2025-06-16 00:00")).is_err());
    }

    #[test]
    fn test_fmt_local_time() {
        assert_eq!(fmt_local_time(&dt("2025-06-16 11:00"), "America/New_York"), "7:00 AM");
        assert_eq!(fmt_local_time(&dt("2025-06-16 11:00"), "not-a-zone"), "11:00 UTC");
    }
}
