//! Lenient readers for block JSON produced by the trading application.
//!
//! Its serializer writes integer ids, ISO-8601 dates and decimal amounts;
//! blocks written by this crate carry string ids, millisecond timestamps and
//! whole minor units. Both shapes decode to the same fields.

use chrono::{DateTime, NaiveDateTime};
use serde::de::Error;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(u64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeRepr {
    Millis(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UnitsRepr {
    Whole(u64),
    Decimal(f64),
}

pub(crate) fn id_from_text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match IdRepr::deserialize(deserializer)? {
        IdRepr::Text(id) => Ok(id),
        IdRepr::Number(id) => Ok(id.to_string()),
    }
}

pub(crate) fn millis_from_number_or_iso8601<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match TimeRepr::deserialize(deserializer)? {
        TimeRepr::Millis(millis) => Ok(millis),
        TimeRepr::Text(text) => parse_iso8601_millis(&text).map_err(D::Error::custom),
    }
}

pub(crate) fn units_from_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match UnitsRepr::deserialize(deserializer)? {
        UnitsRepr::Whole(units) => Ok(units),
        // 2^64 is exactly representable; anything at or above it does not fit
        UnitsRepr::Decimal(value)
            if value >= 0.0 && value.fract() == 0.0 && value < 18_446_744_073_709_551_616.0 =>
        {
            Ok(value as u64)
        }
        UnitsRepr::Decimal(value) => Err(D::Error::custom(format!(
            "amount {value} is not a whole number of minor units"
        ))),
    }
}

/// Milliseconds since the epoch. A date without an offset is read as UTC.
fn parse_iso8601_millis(text: &str) -> Result<i64, String> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Ok(date.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|date| date.and_utc().timestamp_millis())
        .map_err(|e| format!("invalid date {text:?}: {e}"))
}
