//! Approval state machine for all-day bookings.
//!
//! ```text
//!   create ──┬── all-day, approval required, non-admin ──► PendingApproval
//!            └── otherwise ─────────────────────────────► NotRequired
//!   PendingApproval ── approve (admin) ──► Approved
//!   PendingApproval ── reject (admin, reason) ──► Rejected (+ status cancelled)
//!   any all-day ── moved or resized by a non-admin ──► PendingApproval
//! ```

use crate::model::*;

use super::EngineError;

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

/// State of a newly created reservation.
pub(crate) fn initial_state(
    all_day: bool,
    reason: Option<&str>,
    requester: &Requester,
    config: &ReservationConfig,
) -> Result<ApprovalState, EngineError> {
    if !all_day {
        return Ok(ApprovalState::NotRequired);
    }
    if non_blank(reason).is_none() {
        return Err(EngineError::MissingReason);
    }
    if config.requires_approval_for_all_day && !requester.is_admin() {
        Ok(ApprovalState::PendingApproval)
    } else {
        Ok(ApprovalState::NotRequired)
    }
}

/// State after an edit. Turning a bounded booking into an all-day one
/// re-enters approval as if it were new; the reverse drops the requirement.
/// An all-day booking whose days or table change (`moved`) is also judged
/// afresh, so an approval only ever covers the window it was given for.
pub(crate) fn state_after_update(
    existing: &Reservation,
    all_day: bool,
    moved: bool,
    reason: Option<&str>,
    requester: &Requester,
    config: &ReservationConfig,
) -> Result<ApprovalState, EngineError> {
    match (existing.all_day, all_day) {
        (false, true) => initial_state(true, reason, requester, config),
        (_, false) => Ok(ApprovalState::NotRequired),
        (true, true) if moved => initial_state(true, reason, requester, config),
        (true, true) => {
            if non_blank(reason).is_none() {
                return Err(EngineError::MissingReason);
            }
            Ok(existing.approval.clone())
        }
    }
}

fn require_pending(reservation: &Reservation) -> Result<(), EngineError> {
    if !reservation.is_active() {
        return Err(EngineError::InvalidState("reservation is no longer active"));
    }
    if reservation.approval != ApprovalState::PendingApproval {
        return Err(EngineError::InvalidState("reservation is not pending approval"));
    }
    Ok(())
}

/// Validate `PendingApproval -> Approved`.
pub(crate) fn check_approve(reservation: &Reservation, requester: &Requester) -> Result<(), EngineError> {
    if !requester.is_admin() {
        return Err(EngineError::Forbidden("only administrators can approve reservations"));
    }
    require_pending(reservation)
}

/// Validate `PendingApproval -> Rejected` and return the trimmed reason.
pub(crate) fn check_reject(
    reservation: &Reservation,
    requester: &Requester,
    reason: &str,
) -> Result<String, EngineError> {
    if !requester.is_admin() {
        return Err(EngineError::Forbidden("only administrators can reject reservations"));
    }
    if !reservation.all_day {
        return Err(EngineError::NotRejectable(reservation.id));
    }
    let reason = non_blank(Some(reason)).ok_or(EngineError::MissingReason)?;
    require_pending(reservation)?;
    Ok(reason.to_string())
}
