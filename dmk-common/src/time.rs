//! Timestamp utilities

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Convert fractional Unix epoch seconds to a UTC timestamp
///
/// Returns `None` for non-finite input or values outside chrono's representable range.
pub fn epoch_seconds_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }

    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Convert fractional Unix epoch milliseconds to a UTC timestamp
pub fn epoch_millis_to_utc(millis: f64) -> Option<DateTime<Utc>> {
    epoch_seconds_to_utc(millis / 1000.0)
}

/// Offset a timestamp by fractional seconds (saturating to the input on overflow)
pub fn offset_by_seconds(base: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    if !seconds.is_finite() {
        return base;
    }
    let micros = (seconds * 1_000_000.0).round() as i64;
    base.checked_add_signed(ChronoDuration::microseconds(micros))
        .unwrap_or(base)
}
