//! Timestamp utilities

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current business date (UTC)
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Next mutation timestamp for a record last touched at `previous`.
///
/// Always strictly greater than `previous`, even when the wall clock has not
/// advanced or has stepped backwards.
pub fn advance_past(previous: DateTime<Utc>) -> DateTime<Utc> {
    let current = now();
    if current > previous {
        current
    } else {
        previous + Duration::microseconds(1)
    }
}
