//! Feed timestamp parsing
//!
//! The feed sends ISO-8601 UTC timestamps (`2021-01-02T03:04:05.123456Z`);
//! anything without the trailing `Z` is read as a decimal epoch count in seconds.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::TimestampError;

const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Parse a feed timestamp into an absolute UTC time.
pub fn parse_time(input: &str) -> Result<DateTime<Utc>, TimestampError> {
    let err = || TimestampError {
        input: input.to_string(),
    };

    if input.ends_with('Z') {
        return NaiveDateTime::parse_from_str(input, UTC_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|_| err());
    }

    if let Ok(secs) = input.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0).ok_or_else(err);
    }

    let secs: f64 = input.trim().parse().map_err(|_| err())?;
    from_epoch_seconds(secs).ok_or_else(err)
}

/// Convert fractional epoch seconds to a UTC time.
pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_parse_utc_with_micros() {
        let t = parse_time("2021-01-02T03:04:05.123456Z").unwrap();
        let expected = Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(t, expected);
        assert_eq!(t.nanosecond(), 123_456_000);
    }

    #[test]
    fn test_parse_utc_millis_and_no_fraction() {
        let t = parse_time("2021-01-02T03:04:05.000Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap());

        let t = parse_time("2021-01-02T03:04:05Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap());
    }

    #[test]
    fn test_parse_epoch_integer() {
        let t = parse_time("1609556645").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap());
    }

    #[test]
    fn test_parse_epoch_fractional() {
        let t = parse_time("1609556645.5").unwrap();
        assert_eq!(t.timestamp(), 1609556645);
        assert_eq!(t.nanosecond(), 500_000_000);
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(parse_time("yesterday").is_err());
        assert!(parse_time("2021-01-02 03:04:05").is_err());
        assert!(parse_time("2021-13-02T03:04:05.000Z").is_err());
        assert!(parse_time("").is_err());

        let err = parse_time("nope").unwrap_err();
        assert_eq!(err.input, "nope");
    }

    #[test]
    fn test_from_epoch_seconds_rejects_nan() {
        assert!(from_epoch_seconds(f64::NAN).is_none());
        assert!(from_epoch_seconds(f64::INFINITY).is_none());
    }
}
