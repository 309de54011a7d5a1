// Inbound wire format: JSON array of records, bars tagged with "T": "b"
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::error::{DecodeError, FieldError};
use crate::models::BarRecord;

/// Discriminator value for bar records
pub const BAR_KIND: &str = "b";

/// Seconds precision, literal `Z` suffix
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// What became of one record of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Bar(BarRecord),
    /// Not a bar (`T` absent or different); dropped without complaint
    Ignored { kind: Option<String> },
    /// A bar that failed validation
    Dropped(FieldError),
}

/// Split a payload into its records. Fails only when the payload as a whole
/// is unreadable.
pub fn decode_batch(payload: &[u8]) -> Result<Vec<Value>, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    match serde_json::from_str::<Value>(text)? {
        Value::Array(records) => Ok(records),
        _ => Err(DecodeError::NotABatch),
    }
}

/// Classify one record, parsing it when it is a bar
pub fn parse_record(record: &Value, validate_ohlc: bool) -> RecordOutcome {
    let Some(fields) = record.as_object() else {
        return RecordOutcome::Dropped(FieldError::NotAnObject);
    };

    let kind = fields.get("T").and_then(Value::as_str);
    if kind != Some(BAR_KIND) {
        return RecordOutcome::Ignored {
            kind: kind.map(str::to_string),
        };
    }

    match parse_bar(fields, validate_ohlc) {
        Ok(bar) => RecordOutcome::Bar(bar),
        Err(e) => RecordOutcome::Dropped(e),
    }
}

fn parse_bar(fields: &Map<String, Value>, validate_ohlc: bool) -> Result<BarRecord, FieldError> {
    // All required fields must be present before anything is parsed
    for field in ["o", "h", "l", "c", "v", "t"] {
        if fields.get(field).map_or(true, Value::is_null) {
            return Err(FieldError::Missing(field));
        }
    }

    let open = decimal_field(fields, "o")?;
    let high = decimal_field(fields, "h")?;
    let low = decimal_field(fields, "l")?;
    let close = decimal_field(fields, "c")?;
    let volume = decimal_field(fields, "v")?;
    let timestamp = timestamp_field(fields)?;

    for (name, value) in [("o", open), ("h", high), ("l", low), ("c", close)] {
        if value <= Decimal::ZERO {
            return Err(FieldError::OutOfRange(name));
        }
    }
    if volume < Decimal::ZERO {
        return Err(FieldError::OutOfRange("v"));
    }
    if validate_ohlc && (low > open.min(close) || high < open.max(close) || low > high) {
        return Err(FieldError::InconsistentRange);
    }

    let symbol = fields
        .get("S")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(BarRecord {
        symbol,
        timestamp,
        open,
        high,
        low,
        close,
        volume,
    })
}

/// Numbers arrive either as JSON numbers or as numeric strings
fn decimal_field(fields: &Map<String, Value>, field: &'static str) -> Result<Decimal, FieldError> {
    let invalid = |value: &Value| FieldError::InvalidNumber {
        field,
        value: value.to_string(),
    };

    let value = fields.get(field).ok_or(FieldError::Missing(field))?;
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(invalid(other)),
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| invalid(value))
}

fn timestamp_field(fields: &Map<String, Value>) -> Result<DateTime<Utc>, FieldError> {
    let value = fields.get("t").ok_or(FieldError::Missing("t"))?;
    let raw = value
        .as_str()
        .ok_or_else(|| FieldError::InvalidTimestamp(value.to_string()))?;

    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| FieldError::InvalidTimestamp(raw.to_string()))
}
