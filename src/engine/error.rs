use ulid::Ulid;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidRange,
    PastDate,
    InsufficientNotice {
        required_hours: f64,
    },
    DurationExceeded {
        max_hours: f64,
    },
    OutsideOpeningHours,
    DailyQuotaExceeded {
        limit: u32,
    },
    ResourceConflict {
        conflicting: Vec<Ulid>,
    },
    ConsecutiveNotAllowed(Ulid),
    InsufficientGap {
        actual_minutes: i64,
        required_minutes: u32,
    },
    MissingReason,
    NotRejectable(Ulid),
    InvalidState(&'static str),
    Forbidden(&'static str),
    HasActiveReservations(Ulid),
    InvalidConfig(&'static str),
    LimitExceeded(&'static str),
    StoreFailure(String),
}

impl EngineError {
    /// Stable machine-readable code, used on the wire and as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidRange => "invalid_range",
            EngineError::PastDate => "past_date",
            EngineError::InsufficientNotice { .. } => "insufficient_notice",
            EngineError::DurationExceeded { .. } => "duration_exceeded",
            EngineError::OutsideOpeningHours => "outside_opening_hours",
            EngineError::DailyQuotaExceeded { .. } => "daily_quota_exceeded",
            EngineError::ResourceConflict { .. } => "resource_conflict",
            EngineError::ConsecutiveNotAllowed(_) => "consecutive_not_allowed",
            EngineError::InsufficientGap { .. } => "insufficient_gap",
            EngineError::MissingReason => "missing_reason",
            EngineError::NotRejectable(_) => "not_rejectable",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::HasActiveReservations(_) => "has_active_reservations",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::StoreFailure(_) => "store_failure",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange => write!(f, "start time must be before end time"),
            EngineError::PastDate => write!(f, "cannot book a time in the past"),
            EngineError::InsufficientNotice { required_hours } => {
                write!(f, "reservations must be made at least {required_hours} hours in advance")
            }
            EngineError::DurationExceeded { max_hours } => {
                write!(f, "reservation exceeds the maximum of {max_hours} hours")
            }
            EngineError::OutsideOpeningHours => {
                write!(f, "reservation falls outside the allowed daily hours")
            }
            EngineError::DailyQuotaExceeded { limit } => {
                write!(f, "daily limit of {limit} reservations reached")
            }
            EngineError::ResourceConflict { conflicting } => {
                write!(f, "table already booked; conflicts with: {conflicting:?}")
            }
            EngineError::ConsecutiveNotAllowed(id) => {
                write!(f, "back-to-back bookings are not allowed (adjacent to {id})")
            }
            EngineError::InsufficientGap {
                actual_minutes,
                required_minutes,
            } => write!(
                f,
                "gap of {actual_minutes} minutes to the nearest booking is below the required {required_minutes} minutes"
            ),
            EngineError::MissingReason => write!(f, "a reason is required"),
            EngineError::NotRejectable(id) => {
                write!(f, "reservation {id} is not an all-day booking and cannot be rejected")
            }
            EngineError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::HasActiveReservations(id) => {
                write!(f, "table {id} still has active reservations")
            }
            EngineError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreFailure(e) => write!(f, "store failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
