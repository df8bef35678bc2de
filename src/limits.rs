//! Input limits enforced on every write.

pub const MAX_EMPLOYEES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_REASON_LEN: usize = 1_000;
pub const MAX_NOTES_LEN: usize = 4_000;

/// Per availability record, for each of `exceptions` and `monthly_availability`.
pub const MAX_DATE_OVERRIDES: usize = 1_000;

pub const MAX_SELECTED_DATES: usize = 62;
pub const MAX_OFF_REQUEST_DAYS: i64 = 366;
pub const MAX_OFF_REQUESTS_PER_EMPLOYEE: usize = 5_000;

pub const MAX_BOOKINGS_PER_EMPLOYEE: usize = 100_000;
pub const MIN_BOOKING_MINUTES: u32 = 1;
pub const MAX_BOOKING_MINUTES: u32 = 24 * 60;

pub const MAX_CONTRACTS_PER_CLIENT: usize = 1_000;
