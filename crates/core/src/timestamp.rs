//! Timestamp wire format.
//!
//! Timestamps are written as fixed-width RFC 3339 UTC strings with nanosecond
//! precision, so byte order of the string equals chronological order. Reading
//! is lenient: any RFC 3339 offset is accepted, and naive ISO-8601 strings
//! (no offset) are taken as UTC.
//!
//! The module doubles as a `#[serde(with = "...")]` adapter.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

use crate::ValidationError;

/// Render a timestamp in the canonical wire form.
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a timestamp from its wire form.
pub fn parse(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ValidationError::InvalidTimestamp(raw.to_string()))
}

/// Serde serializer for [`format`].
pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(ts))
}

/// Serde deserializer for [`parse`].
pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let fractional = whole + chrono::Duration::nanoseconds(6);

        assert_eq!(format(&whole), "2025-01-02T03:04:05.000000000Z");
        assert_eq!(format(&fractional), "2025-01-02T03:04:05.000000006Z");
        assert!(format(&whole) < format(&fractional));
    }

    #[test]
    fn test_parse_accepts_offsets_and_naive() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        assert_eq!(parse("2025-01-02T03:04:05Z").unwrap(), expected);
        assert_eq!(parse("2025-01-02T05:04:05+02:00").unwrap(), expected);
        assert_eq!(parse("2025-01-02T03:04:05").unwrap(), expected);
        assert_eq!(
            parse("2025-01-02T03:04:05.250000").unwrap(),
            expected + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse("yesterday"),
            Err(ValidationError::InvalidTimestamp(_))
        ));
    }
}
