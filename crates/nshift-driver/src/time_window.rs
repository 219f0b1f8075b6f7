use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use nshift_domain::{DayOfWeek, Schedule};

/// Clock & Time-Window Evaluator.
///
/// Resolves DST ambiguity the way `other_examples`' `cron_next_tz` does:
/// disambiguate `LocalResult::Ambiguous` by taking the earlier instant, and
/// treat `LocalResult::None` (the bound falls inside a spring-forward gap)
/// as the transition instant itself — the window boundary collapses to the
/// start of the gap rather than failing to resolve.
pub fn in_window(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    let tz: Tz = match schedule.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => return false,
    };

    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive();
    let weekday = DayOfWeek::from_chrono(local_now.weekday());
    if !schedule.active_days.contains(&weekday) {
        return false;
    }

    let start_time = match parse_hms(&schedule.start_hms) {
        Some(t) => t,
        None => return false,
    };
    let end_time = match parse_hms(&schedule.end_hms) {
        Some(t) => t,
        None => return false,
    };

    let start_today = resolve_local(&tz, today, start_time);
    let mut end_today = resolve_local(&tz, today, end_time);
    if end_today < start_today {
        end_today = resolve_local(&tz, today + Duration::days(1), end_time);
    }

    start_today <= now && now < end_today
}

fn parse_hms(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S").ok()
}

/// Resolve a local wall-clock date+time in `tz` to a UTC instant.
///
/// `Ambiguous` (fall-back) resolves to the earlier of the two instants.
/// `None` (spring-forward gap) resolves to the instant the gap begins.
fn resolve_local(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earlier, _later) => earlier.with_timezone(&Utc),
        chrono::LocalResult::None => gap_start(tz, naive),
    }
}

/// When `naive` falls inside a spring-forward gap, walk forward minute by
/// minute (bounded) until a resolvable instant is found; that instant's
/// start is the gap's beginning.
fn gap_start(tz: &Tz, naive: chrono::NaiveDateTime) -> DateTime<Utc> {
    for minutes in 1..=180i64 {
        let probe = naive + Duration::minutes(minutes);
        if let chrono::LocalResult::Single(dt) = tz.from_local_datetime(&probe) {
            return dt.with_timezone(&Utc) - Duration::minutes(minutes);
        }
    }
    Utc.from_utc_datetime(&naive)
}
