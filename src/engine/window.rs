//! Quota and window rules: range, past date, notice, duration, opening
//! hours and the per-user daily quota. Pure functions over a policy snapshot.

use chrono::{NaiveDate, Offset};
use ulid::Ulid;

use crate::civil::{civil_date, local_datetime, resolve_local};
use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A requested window resolved to engine instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedWindow {
    pub start: Ms,
    pub end: Ms,
    pub utc_offset_secs: i32,
    pub end_utc_offset_secs: i32,
    pub all_day: bool,
}

fn club_offset_secs(ms: Ms, tz: chrono_tz::Tz) -> i32 {
    chrono::DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .with_timezone(&tz)
        .offset()
        .fix()
        .local_minus_utc()
}

/// Turn the caller's window into instants. All-day windows cover the
/// configured daily hours from the first to the last civil day.
pub(crate) fn resolve_window(
    window: &RequestedWindow,
    config: &ReservationConfig,
) -> Result<ResolvedWindow, EngineError> {
    match window {
        RequestedWindow::Bounded { start, end } => Ok(ResolvedWindow {
            start: start.timestamp_millis(),
            end: end.timestamp_millis(),
            utc_offset_secs: start.offset().local_minus_utc(),
            end_utc_offset_secs: end.offset().local_minus_utc(),
            all_day: false,
        }),
        RequestedWindow::AllDay { date, days } => {
            if *days == 0 {
                return Err(EngineError::InvalidRange);
            }
            if *days > MAX_ALL_DAY_DAYS {
                return Err(EngineError::LimitExceeded("all-day booking spans too many days"));
            }
            let last: NaiveDate = date
                .checked_add_days(chrono::Days::new(u64::from(*days - 1)))
                .ok_or(EngineError::InvalidRange)?;
            let tz = config.timezone;
            let start = resolve_local(*date, config.allowed_start_time, tz)
                .ok_or(EngineError::InvalidRange)?;
            let end = resolve_local(last, config.allowed_end_time, tz)
                .ok_or(EngineError::InvalidRange)?;
            Ok(ResolvedWindow {
                start,
                end,
                utc_offset_secs: club_offset_secs(start, tz),
                end_utc_offset_secs: club_offset_secs(end, tz),
                all_day: true,
            })
        }
    }
}

/// Range and timestamp sanity. Returns the span once `start < end` holds.
pub(crate) fn check_range(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidRange);
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(Span::new(start, end))
}

/// Past-date and advance-notice rules.
pub(crate) fn check_timing(span: &Span, config: &ReservationConfig, now: Ms) -> Result<(), EngineError> {
    if span.start < now {
        return Err(EngineError::PastDate);
    }
    if config.min_hours_in_advance > 0.0 {
        let lead_hours = (span.start - now) as f64 / HOUR as f64;
        if lead_hours < config.min_hours_in_advance {
            return Err(EngineError::InsufficientNotice {
                required_hours: config.min_hours_in_advance,
            });
        }
    }
    Ok(())
}

/// Duration cap and opening hours. All-day bookings are exempt from both:
/// their window is derived from the opening hours in the first place.
pub(crate) fn check_shape(span: &Span, all_day: bool, config: &ReservationConfig) -> Result<(), EngineError> {
    if all_day {
        return Ok(());
    }
    if span.hours() > config.max_hours_per_reservation {
        return Err(EngineError::DurationExceeded {
            max_hours: config.max_hours_per_reservation,
        });
    }
    let tz = config.timezone;
    let local_start = local_datetime(span.start, tz);
    let local_end = local_datetime(span.end, tz);
    if local_start.date() != local_end.date()
        || local_start.time() < config.allowed_start_time
        || local_end.time() > config.allowed_end_time
    {
        return Err(EngineError::OutsideOpeningHours);
    }
    Ok(())
}

/// Count the active reservations (given as `(id, start)`) that start on `date`.
pub(crate) fn count_on_day(
    entries: &[(Ulid, Ms)],
    exclude: Option<Ulid>,
    date: NaiveDate,
    config: &ReservationConfig,
) -> usize {
    entries
        .iter()
        .filter(|(id, _)| Some(*id) != exclude)
        .filter(|(_, start)| civil_date(*start, config.timezone) == date)
        .count()
}

pub(crate) fn check_daily_quota(
    entries: &[(Ulid, Ms)],
    exclude: Option<Ulid>,
    candidate_start: Ms,
    config: &ReservationConfig,
) -> Result<(), EngineError> {
    let limit = config.max_reservations_per_user_per_day;
    if limit == 0 {
        return Ok(());
    }
    let day = civil_date(candidate_start, config.timezone);
    if count_on_day(entries, exclude, day, config) >= limit as usize {
        return Err(EngineError::DailyQuotaExceeded { limit });
    }
    Ok(())
}
