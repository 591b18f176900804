//! Interval overlap and adjacency rules for one table.

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Active reservations on the table that overlap `span`, minus `exclude`.
pub fn find_conflicts(table: &TableState, span: &Span, exclude: Option<Ulid>) -> Vec<Ulid> {
    table
        .active_overlapping(span)
        .filter(|r| Some(r.id) != exclude && r.span.overlaps(span))
        .map(|r| r.id)
        .collect()
}

pub(crate) fn check_no_conflict(
    table: &TableState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let conflicting = find_conflicts(table, span, exclude);
    if conflicting.is_empty() {
        Ok(())
    } else {
        Err(EngineError::ResourceConflict { conflicting })
    }
}

/// Consecutive-booking and minimum-gap rules. Assumes `span` overlaps nothing.
///
/// Exact adjacency is a gap of zero: with a positive minimum gap it fails
/// the gap rule even when consecutive bookings are allowed.
pub(crate) fn check_adjacency(
    table: &TableState,
    span: &Span,
    exclude: Option<Ulid>,
    config: &ReservationConfig,
) -> Result<(), EngineError> {
    if !config.allow_consecutive_reservations
        && let Some(neighbour) = table
            .active_near(span, 0)
            .filter(|r| Some(r.id) != exclude)
            .find(|r| r.span.is_adjacent(span))
    {
        return Err(EngineError::ConsecutiveNotAllowed(neighbour.id));
    }

    let min_gap = config.min_gap_ms();
    if min_gap > 0 {
        let closest = table
            .active_near(span, min_gap)
            .filter(|r| Some(r.id) != exclude)
            .filter_map(|r| span.gap_to(&r.span))
            .min();
        if let Some(gap) = closest
            && gap < min_gap
        {
            return Err(EngineError::InsufficientGap {
                actual_minutes: gap / MINUTE,
                required_minutes: config.min_time_between_reservations_minutes,
            });
        }
    }
    Ok(())
}
