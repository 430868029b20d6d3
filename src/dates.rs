use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::models::DateRange;

/// Parse a `DD-MM-YYYY` token into ISO `YYYY-MM-DD`.
///
/// The shape is checked byte by byte before the calendar check, so
/// unpadded (`1-3-2024`), short-year or differently separated tokens
/// are rejected even where chrono's `%d-%m-%Y` would accept them.
pub fn parse_date(token: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError::DateFormat(token.to_string());

    let bytes = token.as_bytes();
    if bytes.len() != 10 || bytes[2] != b'-' || bytes[5] != b'-' {
        return Err(invalid());
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != 2 && *idx != 5)
        .all(|(_, b)| b.is_ascii_digit());
    if !digits_ok {
        return Err(invalid());
    }

    let day: u32 = token[0..2].parse().map_err(|_| invalid())?;
    let month: u32 = token[3..5].parse().map_err(|_| invalid())?;
    let year: i32 = token[6..10].parse().map_err(|_| invalid())?;

    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
    Ok(date.format("%Y-%m-%d").to_string())
}

/// Normalize a date cell coming from the log.
/// `DD-MM-YYYY` cells are converted, anything else is kept verbatim.
pub fn normalize_log_date(cell: &str) -> String {
    let cell = cell.trim();
    parse_date(cell).unwrap_or_else(|_| cell.to_string())
}

impl DateRange {
    /// Both tokens must parse; order between them is not checked.
    pub fn parse(start: &str, end: &str) -> Result<Self, ValidationError> {
        Ok(DateRange {
            start: parse_date(start)?,
            end: parse_date(end)?,
        })
    }
}
