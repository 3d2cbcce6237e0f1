/// Largest quantity a single line may request.
pub const MAX_LINE_QUANTITY: u32 = 999;

/// Distinct resources a single stage may hold.
pub const MAX_LINES_PER_STAGE: usize = 100;

/// Widest rental window, in calendar days.
pub const MAX_WINDOW_DAYS: i64 = 366;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_NOTE_LEN: usize = 2000;
pub const MAX_RESOURCES: usize = 100_000;

/// Candidate references tried before giving up.
pub const REFERENCE_ATTEMPTS: usize = 10;
