use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only instant type inside the engine.
pub type Ms = i64;

pub const MINUTE: Ms = 60_000;
pub const HOUR: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn hours(&self) -> f64 {
        self.duration_ms() as f64 / HOUR as f64
    }

    /// The one overlap predicate used everywhere in the engine.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when one span starts exactly at the instant the other ends.
    pub fn is_adjacent(&self, other: &Span) -> bool {
        self.start == other.end || self.end == other.start
    }

    /// Distance between two non-overlapping spans. `None` if they overlap.
    pub fn gap_to(&self, other: &Span) -> Option<Ms> {
        if self.overlaps(other) {
            None
        } else if other.end <= self.start {
            Some(self.start - other.end)
        } else {
            Some(other.start - self.end)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
}

/// Identity and role of whoever issues a request. Authentication happens upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: Ulid,
    pub role: Role,
}

impl Requester {
    pub fn member(id: Ulid) -> Self {
        Self { id, role: Role::Member }
    }

    pub fn admin(id: Ulid) -> Self {
        Self { id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Cancelled,
    Completed,
}

/// Approval lifecycle of a reservation.
///
/// `NotRequired` and `Approved` are both "approved"; `Rejected` is only
/// ever reached together with `ReservationStatus::Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    NotRequired,
    PendingApproval,
    Approved,
    Rejected { reason: String },
}

/// What the caller is told about a freshly written reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    PendingApproval,
}

impl BookingStatus {
    pub fn message(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::PendingApproval => "pending administrator approval",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    /// UTC offsets the requester submitted for start and end; they recover
    /// the wall-clock input on both sides of a DST change.
    pub utc_offset_secs: i32,
    pub end_utc_offset_secs: i32,
    pub duration_hours: f64,
    pub num_members: u32,
    pub num_guests: u32,
    pub all_day: bool,
    pub reason: Option<String>,
    pub status: ReservationStatus,
    pub approval: ApprovalState,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn approved(&self) -> bool {
        matches!(self.approval, ApprovalState::NotRequired | ApprovalState::Approved)
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match &self.approval {
            ApprovalState::Rejected { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn booking_status(&self) -> BookingStatus {
        if self.approval == ApprovalState::PendingApproval {
            BookingStatus::PendingApproval
        } else {
            BookingStatus::Confirmed
        }
    }

    pub fn local_start(&self) -> DateTime<FixedOffset> {
        to_local(self.span.start, self.utc_offset_secs)
    }

    pub fn local_end(&self) -> DateTime<FixedOffset> {
        to_local(self.span.end, self.end_utc_offset_secs)
    }
}

/// Rebuild the wall-clock instant a user submitted from UTC millis and their offset.
///
/// `ms` must lie within `MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS`.
/// Stored spans always do, since `check_range` rejects anything else before
/// a reservation is built. An instant chrono cannot represent comes back as
/// the Unix epoch.
pub fn to_local(ms: Ms, offset_secs: i32) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(offset_secs).unwrap_or_else(|| Utc.fix());
    DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .with_timezone(&offset)
}

/// Booking policy, administered externally and read by every checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    pub max_hours_per_reservation: f64,
    /// 0 disables the quota.
    pub max_reservations_per_user_per_day: u32,
    /// 0 disables the notice rule.
    pub min_hours_in_advance: f64,
    pub allowed_start_time: NaiveTime,
    pub allowed_end_time: NaiveTime,
    pub requires_approval_for_all_day: bool,
    pub allow_consecutive_reservations: bool,
    pub min_time_between_reservations_minutes: u32,
    /// Club timezone; defines the civil day for quotas and opening hours.
    pub timezone: Tz,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            max_hours_per_reservation: 4.0,
            max_reservations_per_user_per_day: 2,
            min_hours_in_advance: 0.0,
            allowed_start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            allowed_end_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            requires_approval_for_all_day: true,
            allow_consecutive_reservations: true,
            min_time_between_reservations_minutes: 0,
            timezone: Tz::UTC,
        }
    }
}

impl ReservationConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.max_hours_per_reservation.is_finite() || self.max_hours_per_reservation <= 0.0 {
            return Err("max_hours_per_reservation must be positive");
        }
        if !self.min_hours_in_advance.is_finite() || self.min_hours_in_advance < 0.0 {
            return Err("min_hours_in_advance must not be negative");
        }
        if self.allowed_start_time >= self.allowed_end_time {
            return Err("allowed_start_time must be before allowed_end_time");
        }
        Ok(())
    }

    pub fn min_gap_ms(&self) -> Ms {
        self.min_time_between_reservations_minutes as Ms * MINUTE
    }
}

#[derive(Debug, Clone)]
pub struct TableState {
    pub id: Ulid,
    pub name: String,
    /// Every reservation ever made on this table (any status), sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl TableState {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Active reservations whose span comes within `margin` of `query`,
    /// endpoints included (so exact adjacency is reported with margin 0).
    /// Uses binary search to skip reservations starting after `query.end + margin`.
    pub fn active_near(&self, query: &Span, margin: Ms) -> impl Iterator<Item = &Reservation> {
        let lo = query.start - margin;
        let hi = query.end + margin;
        let right_bound = self.reservations.partition_point(|r| r.span.start <= hi);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.is_active() && r.span.end >= lo)
    }

    /// Active reservations whose span overlaps `query`.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self.reservations.partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.is_active() && r.span.end > query.start)
    }

    pub fn active_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.is_active()).count()
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    TableCreated {
        id: Ulid,
        name: String,
    },
    TableRemoved {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    /// Full replacement; `previous_resource_id` differs when the table changed.
    ReservationUpdated {
        previous_resource_id: Ulid,
        reservation: Reservation,
    },
    ReservationApproved {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
    ReservationRejected {
        id: Ulid,
        resource_id: Ulid,
        reason: String,
        at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
    ReservationCompleted {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
    ConfigUpdated {
        config: ReservationConfig,
    },
}

// ── Request types ────────────────────────────────────────────────

/// Time window as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestedWindow {
    /// Bounded hours; the offset of `start` is kept for round-tripping.
    Bounded {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },
    /// Whole days in the club timezone, starting at `date`.
    AllDay { date: NaiveDate, days: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub resource_id: Ulid,
    pub window: RequestedWindow,
    #[serde(default)]
    pub num_members: u32,
    #[serde(default)]
    pub num_guests: u32,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Fields to change on an existing reservation; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationPatch {
    pub resource_id: Option<Ulid>,
    pub window: Option<RequestedWindow>,
    pub num_members: Option<u32>,
    pub num_guests: Option<u32>,
    pub reason: Option<String>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub id: Ulid,
    pub name: String,
    pub active_reservations: usize,
}

/// A reservation together with what the caller should be told about it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationOutcome {
    pub reservation: Reservation,
    pub status: BookingStatus,
}

impl ReservationOutcome {
    pub fn new(reservation: Reservation) -> Self {
        let status = reservation.booking_status();
        Self { reservation, status }
    }

    pub fn message(&self) -> &'static str {
        self.status.message()
    }
}
