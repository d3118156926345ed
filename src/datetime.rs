//! Date/time utilities for filegate.
//!
//! Timestamps are stored in SQLite as TEXT in UTC (`YYYY-MM-DD HH:MM:SS`),
//! the same representation `datetime('now')` produces, so stored values and
//! SQL-side comparisons agree lexicographically.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Storage format for UTC timestamps.
pub const SQLITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a UTC datetime for storage.
pub fn to_sqlite(dt: DateTime<Utc>) -> String {
    dt.format(SQLITE_FORMAT).to_string()
}

/// Parse a stored timestamp back to `DateTime<Utc>`.
///
/// Accepts the SQLite format first, falling back to RFC3339 for values
/// written by external tools.
pub fn from_sqlite(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, SQLITE_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Current time formatted for storage.
pub fn now_sqlite() -> String {
    to_sqlite(Utc::now())
}
