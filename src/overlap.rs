use chrono::{NaiveDate, NaiveTime};

use crate::error::EngineError;

/// True iff the closed date intervals `[a_start, a_end]` and
/// `[b_start, b_end]` intersect. Single-day ranges (`start == end`) count.
pub fn overlaps(a_start: NaiveDate, a_end: NaiveDate, b_start: NaiveDate, b_end: NaiveDate) -> bool {
    a_start <= b_end && b_start <= a_end
}

pub fn parse_day(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::Validation(format!("date must be YYYY-MM-DD, got {:?}", s)))
}

pub fn parse_clock(s: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| EngineError::Validation(format!("time must be HH:MM, got {:?}", s)))
}
