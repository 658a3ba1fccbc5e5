use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single appointment: 7 days.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 24 * 3_600_000;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 4096;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PHONE_DIGITS: usize = 20;
pub const MIN_PHONE_DIGITS: usize = 8;

pub const MAX_APPOINTMENTS_PER_OWNER: usize = 100_000;
pub const MAX_AGENDAS: usize = 10_000;
pub const MAX_BREAKS_PER_AGENDA: usize = 32;

pub const MIN_SLOT_MINUTES: u32 = 5;
pub const MAX_SLOT_MINUTES: u32 = 24 * 60;

/// Request bodies larger than this are rejected before parsing.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Audit rows keep at most this many bytes of request/response body.
pub const MAX_AUDIT_BODY_LEN: usize = 8 * 1024;
