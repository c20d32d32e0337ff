//! Conversions between civil calendar dates and instants.
//!
//! All-day appointments carry only a date. They are anchored at local midnight
//! of the organisation's time zone, never at UTC midnight.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

const GAP_STEP_MINUTES: i64 = 15;
const MAX_GAP_STEPS: usize = 4 * 24;

pub fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.trim()
        .parse::<Tz>()
        .map_err(|error| format!("unknown time zone '{}': {error}", name.trim()))
}

/// First instant of `date` in `tz`.
///
/// When midnight is repeated the earlier instant wins. When midnight is
/// skipped by a transition the first local time that exists that day is used.
pub fn local_midnight_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    local_instant_utc(date.and_time(NaiveTime::MIN), tz)
}

/// Resolves a wall-clock reading in `tz` to an instant, walking forward out of
/// a daylight-saving gap.
pub fn local_instant_utc(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    let mut candidate = local;
    for _ in 0..MAX_GAP_STEPS {
        if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
            return resolved.with_timezone(&Utc);
        }
        candidate += Duration::minutes(GAP_STEP_MINUTES);
    }
    Utc.from_utc_datetime(&local)
}
