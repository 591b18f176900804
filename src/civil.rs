//! Conversions between engine instants and the club's civil calendar.
//!
//! Everything day-shaped (quota days, opening hours, all-day windows) goes
//! through these helpers with the configured club timezone.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::model::Ms;

/// Wall-clock time of `ms` in the club timezone.
///
/// Callers pass instants bounded by `check_range` or taken from the clock.
/// An instant chrono cannot represent falls back to the Unix epoch.
pub fn local_datetime(ms: Ms, tz: Tz) -> NaiveDateTime {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .with_timezone(&tz)
        .naive_local()
}

/// Civil date of `ms` in the club timezone.
pub fn civil_date(ms: Ms, tz: Tz) -> NaiveDate {
    local_datetime(ms, tz).date()
}

/// Resolve a club-local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// spring-forward gap are pushed past the gap.
pub fn resolve_local(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<Ms> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.timestamp_millis())
}
