//! Timestamps and time buckets.
//!
//! All instants are Unix nanoseconds in UTC. Rollback logs are bucketed by
//! hour and snapshots by calendar day; both buckets are computed with
//! Euclidean division so instants before the epoch land in the right bucket.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Result, RewindError};

/// Unix timestamp in nanoseconds.
pub type Timestamp = i64;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Nanoseconds per hour.
pub const NANOS_PER_HOUR: i64 = 3_600 * NANOS_PER_SECOND;

/// Nanoseconds per day.
pub const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;

/// Returns the current time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Truncates a timestamp to the start of its hour.
#[must_use]
pub const fn truncate_hour(timestamp: Timestamp) -> Timestamp {
    timestamp - timestamp.rem_euclid(NANOS_PER_HOUR)
}

/// Truncates a timestamp to the start of its UTC day.
#[must_use]
pub const fn truncate_day(timestamp: Timestamp) -> Timestamp {
    timestamp - timestamp.rem_euclid(NANOS_PER_DAY)
}

/// Converts a timestamp to a UTC date-time.
#[must_use]
pub fn to_datetime(timestamp: Timestamp) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_nanos(timestamp)
}

/// Formats a timestamp as RFC 3339 with nanosecond precision.
#[must_use]
pub fn format_timestamp(timestamp: Timestamp) -> String {
    to_datetime(timestamp).to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses a timestamp given either as integer nanoseconds or RFC 3339.
///
/// # Errors
///
/// Returns a validation error if the input is neither.
pub fn parse_timestamp(input: &str) -> Result<Timestamp> {
    let input = input.trim();

    if let Ok(nanos) = input.parse::<i64>() {
        return Ok(nanos);
    }

    let parsed = DateTime::parse_from_rfc3339(input)
        .map_err(|e| RewindError::ValidationError(format!("Malformed timestamp '{input}': {e}")))?;

    parsed.timestamp_nanos_opt().ok_or_else(|| {
        RewindError::ValidationError(format!("Timestamp '{input}' is out of range"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_hour() {
        let ts = 5 * NANOS_PER_HOUR + 1_234;
        assert_eq!(truncate_hour(ts), 5 * NANOS_PER_HOUR);
        assert_eq!(truncate_hour(5 * NANOS_PER_HOUR), 5 * NANOS_PER_HOUR);
    }

    #[test]
    fn test_truncate_day() {
        let ts = 3 * NANOS_PER_DAY + 23 * NANOS_PER_HOUR;
        assert_eq!(truncate_day(ts), 3 * NANOS_PER_DAY);
    }

    #[test]
    fn test_truncate_before_epoch() {
        assert_eq!(truncate_hour(-1), -NANOS_PER_HOUR);
        assert_eq!(truncate_day(-1), -NANOS_PER_DAY);
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("42").unwrap(), 42);
        assert_eq!(
            parse_timestamp("1970-01-01T00:00:01Z").unwrap(),
            NANOS_PER_SECOND
        );
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(RewindError::ValidationError(_))
        ));
    }

    #[test]
    fn test_format_roundtrip() {
        let ts = 1_700_000_000_123_456_789;
        assert_eq!(parse_timestamp(&format_timestamp(ts)).unwrap(), ts);
    }
}
