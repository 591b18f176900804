use crate::model::Ms;

pub const MAX_TABLES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 2_000;
/// Reservations retained per table, history included.
pub const MAX_RESERVATIONS_PER_TABLE: usize = 100_000;
pub const MAX_PARTY_SIZE: u32 = 1_000;
pub const MAX_ALL_DAY_DAYS: u32 = 31;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest accepted request line on the wire.
pub const MAX_LINE_LEN: usize = 64 * 1024;
pub const MAX_CONNECTIONS: usize = 4_096;
