//! Hard caps on input sizes. Everything the wire can grow is bounded here.

pub const MAX_UNITS: usize = 100_000;
pub const MAX_INTERVALS_PER_UNIT: usize = 10_000;
/// Longest stay or blocked range, in days.
pub const MAX_RANGE_DAYS: u64 = 366;
/// Max candidate units in one `filter_available` call.
pub const MAX_FILTER_UNITS: usize = 5_000;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_REASON_LEN: usize = 255;
/// Max guests a unit may declare.
pub const MAX_GUESTS: u32 = 1_000;
/// Max bytes in one request line.
pub const MAX_LINE_LEN: usize = 64 * 1024;
