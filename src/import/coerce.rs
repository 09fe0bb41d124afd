//! Column-type coercion from textual wire values to native forms.
//!
//! Records cross the snapshot as JSON text; the manifest's column tags say
//! which values need to come back as something richer than a string.
//! Instants become epoch milliseconds, `bytea` values become byte arrays,
//! everything else passes through untouched.

use crate::{Error, Result, Row};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeMap;

/// Apply the declared coercions to every tagged column of a record.
pub fn coerce_record(mut record: Row, columns: &BTreeMap<String, String>) -> Result<Row> {
    for (column, tag) in columns {
        if let Some(value) = record.get_mut(column) {
            let taken = value.take();
            *value = coerce_value(tag, taken)?;
        }
    }
    Ok(record)
}

/// Coerce one value according to its source data-type tag. Null passes
/// through unchanged.
pub fn coerce_value(tag: &str, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(value);
    }
    match tag {
        "date"
        | "timestamp with time zone"
        | "timestamp without time zone"
        | "timestamp with timezone"
        | "timestamp without timezone" => coerce_instant(value),
        "bytea" => coerce_bytea(value),
        _ => Ok(value),
    }
}

fn coerce_instant(value: Value) -> Result<Value> {
    let text = match &value {
        Value::String(s) => s.as_str(),
        // already-numeric instants pass through, so re-imports are stable
        _ => return Ok(value),
    };
    let millis = parse_instant(text)
        .ok_or_else(|| Error::Coerce(format!("unparseable timestamp: {}", text)))?;
    Ok(Value::from(millis))
}

/// Epoch milliseconds for a textual date or timestamp. Accepts RFC 3339,
/// space- or T-separated timestamps with or without an offset, and bare
/// dates (taken at midnight UTC).
fn parse_instant(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    let spaced = text.replacen('T', " ", 1);
    if let Ok(dt) = DateTime::parse_from_str(&spaced, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&spaced, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }
    if let Ok(day) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

/// Decode a `\x`-prefixed hex string into its byte sequence.
fn coerce_bytea(value: Value) -> Result<Value> {
    let text = match &value {
        Value::String(s) => s.as_str(),
        _ => return Ok(value),
    };
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| Error::Coerce(format!("bytea value without \\x prefix: {}", text)))?;
    if hex.len() % 2 != 0 {
        return Err(Error::Coerce(format!("odd-length bytea hex: {}", text)));
    }

    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks(2) {
        let digits = std::str::from_utf8(pair)
            .map_err(|_| Error::Coerce(format!("invalid bytea hex: {}", text)))?;
        let byte = u8::from_str_radix(digits, 16)
            .map_err(|_| Error::Coerce(format!("invalid bytea hex: {}", text)))?;
        bytes.push(byte);
    }
    Ok(Value::Array(bytes.into_iter().map(Value::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_bytea_decodes_hex_pairs() {
        let decoded = coerce_value("bytea", json!("\\x4f4b")).unwrap();
        assert_eq!(decoded, json!([0x4F, 0x4B]));
    }

    #[test]
    fn test_empty_bytea() {
        assert_eq!(coerce_value("bytea", json!("\\x")).unwrap(), json!([]));
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(coerce_value("bytea", json!(null)).unwrap(), json!(null));
        assert_eq!(coerce_value("date", json!(null)).unwrap(), json!(null));
    }

    #[test]
    fn test_bad_bytea_is_an_error() {
        assert!(coerce_value("bytea", json!("4f4b")).is_err());
        assert!(coerce_value("bytea", json!("\\x4f4")).is_err());
        assert!(coerce_value("bytea", json!("\\xzz")).is_err());
    }

    #[test]
    fn test_date_is_midnight_utc() {
        let expected = Utc
            .with_ymd_and_hms(2021, 3, 4, 0, 0, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(
            coerce_value("date", json!("2021-03-04")).unwrap(),
            json!(expected)
        );
    }

    #[test]
    fn test_timestamp_formats_agree() {
        let expected = Utc
            .with_ymd_and_hms(2021, 3, 4, 5, 6, 7)
            .unwrap()
            .timestamp_millis();
        for (tag, text) in [
            ("timestamp with time zone", "2021-03-04T05:06:07+00:00"),
            ("timestamp with time zone", "2021-03-04 07:06:07+02"),
            ("timestamp with timezone", "2021-03-04T05:06:07Z"),
            ("timestamp without time zone", "2021-03-04 05:06:07"),
            ("timestamp without timezone", "2021-03-04T05:06:07"),
        ] {
            assert_eq!(
                coerce_value(tag, json!(text)).unwrap(),
                json!(expected),
                "{} {}",
                tag,
                text
            );
        }
    }

    #[test]
    fn test_fractional_seconds() {
        let expected = Utc
            .with_ymd_and_hms(2021, 3, 4, 5, 6, 7)
            .unwrap()
            .timestamp_millis()
            + 123;
        assert_eq!(
            coerce_value("timestamp without time zone", json!("2021-03-04 05:06:07.123"))
                .unwrap(),
            json!(expected)
        );
    }

    #[test]
    fn test_scalar_tags_pass_through() {
        assert_eq!(coerce_value("integer", json!(7)).unwrap(), json!(7));
        assert_eq!(coerce_value("text", json!("ok")).unwrap(), json!("ok"));
    }

    #[test]
    fn test_record_coercion_only_touches_tagged_columns() {
        let columns = BTreeMap::from([
            ("payload".to_string(), "bytea".to_string()),
            ("name".to_string(), "text".to_string()),
        ]);
        let record = json!({"name": "ok", "payload": "\\x4f4b", "extra": 9})
            .as_object()
            .unwrap()
            .clone();

        let coerced = coerce_record(record, &columns).unwrap();
        assert_eq!(coerced["payload"], json!([79, 75]));
        assert_eq!(coerced["name"], json!("ok"));
        assert_eq!(coerced["extra"], json!(9));
    }
}
