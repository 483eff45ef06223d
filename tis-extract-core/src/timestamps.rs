//! Timestamp parsing for TIS attribute values.
//!
//! The API reports dates either as .NET ticks (100ns intervals since
//! 0001-01-01) or as ISO-8601 strings. Both normalise to UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

const TICKS_PER_SECOND: i64 = 10_000_000;
const EPOCH_OFFSET_SECONDS: i64 = 62_135_596_800;

/// Converts .NET ticks to UTC.
pub fn from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let seconds = ticks / TICKS_PER_SECOND - EPOCH_OFFSET_SECONDS;
    let nanos = (ticks % TICKS_PER_SECOND) * 100;
    Utc.timestamp_opt(seconds, nanos as u32).single()
}

/// Parses a raw string value. Returns `None` for anything unrecognised.
pub fn parse_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse::<i64>().ok().and_then(from_ticks);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parses a JSON attribute value, accepting numbers as ticks.
pub fn parse_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(from_ticks),
        Value::String(s) => parse_str(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ticks_convert_to_utc() {
        let dt = parse_str("638349664128090000").unwrap();
        assert_eq!(dt.to_rfc3339(), "2023-11-07T15:06:52.809+00:00");
    }

    #[test]
    fn iso_variants_parse() {
        let a = parse_str("2024-02-01T10:00:00Z").unwrap();
        let b = parse_str("2024-02-01T10:00:00").unwrap();
        let c = parse_str("2024-02-01T12:00:00+02:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(
            parse_str("2024-01-01").unwrap().to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn numbers_are_ticks_and_garbage_is_none() {
        assert!(parse_value(&json!(638349664128090000i64)).is_some());
        assert!(parse_value(&json!("yesterday")).is_none());
        assert!(parse_value(&json!(null)).is_none());
        assert!(parse_str("   ").is_none());
    }
}
