//! Parsing of human-written points in time.
//!
//! Attribute values and frame lookups accept the forms ledgers are usually
//! written in. Everything without an explicit offset is read as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::ValidationError;

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y %b %d %H:%M:%S",
    "%Y %b %d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y %b %d"];

/// Parses a point in time.
///
/// Accepted forms:
/// - RFC 3339 (`2021-12-06T12:00:00+02:00`), converted to UTC
/// - `2021-12-06 12:00[:00]` and `2021-12-06T12:00[:00]`
/// - `2021 Dec 06 12:00[:00]`
/// - `2021-12-06` and `2021 Dec 06`, at midnight
///
/// # Errors
///
/// Returns `InvalidTime` if no form matches.
///
/// # Examples
///
/// ```
/// use chronograph::time::parse_time;
///
/// let a = parse_time("2021 Dec 06 12:00").unwrap();
/// let b = parse_time("2021-12-06T12:00:00Z").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn parse_time(input: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = input.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(t.with_timezone(&Utc));
    }

    for format in DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(naive.and_utc());
            }
        }
    }

    Err(ValidationError::InvalidTime {
        input: input.to_string(),
    })
}
