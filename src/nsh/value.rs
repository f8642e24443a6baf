//! Typed values.
//!
//! Everything a user types is a string, and everything the remote store hands
//! back is JSON. [`Value`] sits between the two: a tagged value that knows its
//! [`ValueType`], can be produced from user text ([`coerce`]) or from JSON
//! ([`Value::from_json`]), and formats back to a canonical string through
//! `Display`.
//!
//! | Type | Accepts | Formats as |
//! |------|---------|------------|
//! | `String` | any text | the text |
//! | `Number` | signed integers | `42` |
//! | `Boolean` | yes/no, true/false, on/off, 1/0 | `yes` / `no` |
//! | `Set` | `a`, `a,b`, `[a, b]` | `a, b` |
//! | `Dict` | `k=v,k2=v2` | `k=v, k2=v2` |
//! | `Size` | `512`, `4K`, `1.5G`, `5GiB` | largest clean unit (lossy) |
//! | `Time` | `hh:mm[:ss]`, `YYYY-MM-DD[ HH:MM:SS]`, RFC 3339 | `YYYY-MM-DD HH:MM:SS` |
//! | `Enum` | any text (choices are checked by the property mapping) | the text |

use crate::error::{NshError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

const SIZE_UNITS: [&str; 6] = ["", "K", "M", "G", "T", "P"];
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Set,
    Dict,
    Size,
    Time,
    Enum,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Set => "set",
            ValueType::Dict => "dict",
            ValueType::Size => "size",
            ValueType::Time => "time",
            ValueType::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// Runtime representation of a property or variable value.
///
/// `Null` is the sentinel for "absent": a getter that walks into a missing
/// key yields `Null` rather than failing.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Number(i64),
    Boolean(bool),
    Set(BTreeSet<String>),
    Dict(BTreeMap<String, String>),
    /// Byte count
    Size(u64),
    Time(DateTime<Utc>),
    Enum(String),
}

impl Value {
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::String(_) => Some(ValueType::String),
            Value::Number(_) => Some(ValueType::Number),
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Set(_) => Some(ValueType::Set),
            Value::Dict(_) => Some(ValueType::Dict),
            Value::Size(_) => Some(ValueType::Size),
            Value::Time(_) => Some(ValueType::Time),
            Value::Enum(_) => Some(ValueType::Enum),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret a JSON document as a value of the given type.
    pub fn from_json(json: &Json, ty: ValueType) -> Result<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }

        match ty {
            ValueType::String => Ok(Value::String(json_text(json))),
            ValueType::Enum => Ok(Value::Enum(json_text(json))),
            ValueType::Number => match json {
                Json::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(Value::Number)
                    .ok_or_else(|| NshError::coercion(n.to_string(), ty)),
                Json::String(s) => coerce(s, ty),
                other => Err(NshError::coercion(other.to_string(), ty)),
            },
            ValueType::Boolean => match json {
                Json::Bool(b) => Ok(Value::Boolean(*b)),
                Json::Number(n) if n.as_i64() == Some(0) => Ok(Value::Boolean(false)),
                Json::Number(n) if n.as_i64() == Some(1) => Ok(Value::Boolean(true)),
                Json::String(s) => coerce(s, ty),
                other => Err(NshError::coercion(other.to_string(), ty)),
            },
            ValueType::Set => match json {
                Json::Array(items) => Ok(Value::Set(items.iter().map(json_text).collect())),
                other => Ok(Value::Set(BTreeSet::from([json_text(other)]))),
            },
            ValueType::Dict => match json {
                Json::Object(map) => Ok(Value::Dict(
                    map.iter().map(|(k, v)| (k.clone(), json_text(v))).collect(),
                )),
                Json::String(s) => coerce(s, ty),
                other => Err(NshError::coercion(other.to_string(), ty)),
            },
            ValueType::Size => match json {
                Json::Number(n) => n
                    .as_u64()
                    .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
                    .map(Value::Size)
                    .ok_or_else(|| NshError::coercion(n.to_string(), ty)),
                Json::String(s) => coerce(s, ty),
                other => Err(NshError::coercion(other.to_string(), ty)),
            },
            ValueType::Time => match json {
                Json::String(s) => coerce(s, ty),
                Json::Number(n) => n
                    .as_i64()
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .map(Value::Time)
                    .ok_or_else(|| NshError::coercion(n.to_string(), ty)),
                other => Err(NshError::coercion(other.to_string(), ty)),
            },
        }
    }

    /// The JSON form sent to the remote store.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::String(s) | Value::Enum(s) => Json::String(s.clone()),
            Value::Number(n) => Json::from(*n),
            Value::Boolean(b) => Json::Bool(*b),
            Value::Set(items) => Json::Array(items.iter().cloned().map(Json::String).collect()),
            Value::Dict(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Json::String(v.clone())))
                    .collect(),
            ),
            Value::Size(bytes) => Json::from(*bytes),
            Value::Time(t) => Json::String(t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("none"),
            Value::String(s) | Value::Enum(s) => f.write_str(s),
            Value::Number(n) => write!(f, "{}", n),
            Value::Boolean(true) => f.write_str("yes"),
            Value::Boolean(false) => f.write_str("no"),
            Value::Set(items) => {
                let items: Vec<&str> = items.iter().map(String::as_str).collect();
                f.write_str(&items.join(", "))
            }
            Value::Dict(map) => {
                let pairs: Vec<String> = map.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                f.write_str(&pairs.join(", "))
            }
            Value::Size(bytes) => f.write_str(&format_size(*bytes)),
            Value::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
        }
    }
}

/// Parse user text into a value of the requested type.
pub fn coerce(raw: &str, ty: ValueType) -> Result<Value> {
    let text = raw.trim();
    match ty {
        ValueType::String => Ok(Value::String(raw.to_string())),
        ValueType::Enum => Ok(Value::Enum(text.to_string())),
        ValueType::Number => text
            .parse::<i64>()
            .map(Value::Number)
            .map_err(|_| NshError::coercion(raw, ty)),
        ValueType::Boolean => match text.to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Ok(Value::Boolean(true)),
            "no" | "false" | "off" | "0" => Ok(Value::Boolean(false)),
            _ => Err(NshError::coercion(raw, ty)),
        },
        ValueType::Set => {
            let inner = strip_brackets(text, '[', ']');
            Ok(Value::Set(
                inner
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            ))
        }
        ValueType::Dict => {
            let inner = strip_brackets(text, '{', '}');
            let mut map = BTreeMap::new();
            for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| NshError::coercion(raw, ty))?;
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
            Ok(Value::Dict(map))
        }
        ValueType::Size => parse_size(text)
            .map(Value::Size)
            .ok_or_else(|| NshError::coercion(raw, ty)),
        ValueType::Time => parse_time(text)
            .map(Value::Time)
            .ok_or_else(|| NshError::coercion(raw, ty)),
    }
}

/// Parse a `hh:mm[:ss]` duration, as used by `older_than` / `newer_than`.
pub fn parse_timedelta(raw: &str) -> Result<TimeDelta> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(NshError::coercion(raw, ValueType::Time));
    }

    let mut seconds: i64 = 0;
    for (i, part) in parts.iter().enumerate() {
        let n: i64 = part
            .parse()
            .map_err(|_| NshError::coercion(raw, ValueType::Time))?;
        if n < 0 || (i > 0 && n >= 60) {
            return Err(NshError::coercion(raw, ValueType::Time));
        }
        seconds = n
            .checked_mul([3600, 60, 1][i])
            .and_then(|part| seconds.checked_add(part))
            .ok_or_else(|| NshError::coercion(raw, ValueType::Time))?;
    }

    TimeDelta::try_seconds(seconds).ok_or_else(|| NshError::coercion(raw, ValueType::Time))
}

/// Format a byte count with the largest unit that keeps the number >= 1.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut exp = 0;
    while value >= 1024.0 && exp < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        exp += 1;
    }

    if exp == 0 {
        return bytes.to_string();
    }
    if value.fract() == 0.0 {
        return format!("{}{}", value as u64, SIZE_UNITS[exp]);
    }

    let fixed = format!("{:.2}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", trimmed, SIZE_UNITS[exp])
}

fn parse_size(text: &str) -> Option<u64> {
    let upper = text.to_ascii_uppercase();
    let mut body = upper.as_str();
    body = body
        .strip_suffix("IB")
        .or_else(|| body.strip_suffix('B'))
        .unwrap_or(body);

    let mut exp = 0;
    if let Some(last) = body.chars().last() {
        if let Some(pos) = SIZE_UNITS.iter().position(|u| u.starts_with(last) && !u.is_empty()) {
            exp = pos;
            body = &body[..body.len() - 1];
        }
    }

    let number: f64 = body.trim().parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some((number * 1024f64.powi(exp as i32)).round() as u64)
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in [TIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }

    // Bare clock time means "today"
    let clock = NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()?;
    Some(Utc.from_utc_datetime(&Utc::now().date_naive().and_time(clock)))
}

fn strip_brackets(text: &str, open: char, close: char) -> &str {
    text.strip_prefix(open)
        .and_then(|t| t.strip_suffix(close))
        .unwrap_or(text)
}

/// Plain-text form of a JSON scalar (strings without quotes).
pub fn json_text(json: &Json) -> String {
    match json {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(raw: &str, ty: ValueType) -> String {
        coerce(raw, ty).unwrap().to_string()
    }

    #[test]
    fn formats_round_trip_to_canonical_strings() {
        assert_eq!(roundtrip("hello world", ValueType::String), "hello world");
        assert_eq!(roundtrip("42", ValueType::Number), "42");
        assert_eq!(roundtrip("-7", ValueType::Number), "-7");
        assert_eq!(roundtrip("yes", ValueType::Boolean), "yes");
        assert_eq!(roundtrip("b, a", ValueType::Set), "a, b");
        assert_eq!(roundtrip("x=1, y=2", ValueType::Dict), "x=1, y=2");
        assert_eq!(roundtrip("5G", ValueType::Size), "5G");
        assert_eq!(
            roundtrip("2024-03-01 10:20:30", ValueType::Time),
            "2024-03-01 10:20:30"
        );
        assert_eq!(roundtrip("STREAM", ValueType::Enum), "STREAM");
    }

    #[test]
    fn boolean_accepts_common_spellings() {
        for raw in ["yes", "YES", "true", "True", "1", "on"] {
            assert_eq!(coerce(raw, ValueType::Boolean).unwrap(), Value::Boolean(true));
        }
        for raw in ["no", "No", "false", "FALSE", "0", "off"] {
            assert_eq!(coerce(raw, ValueType::Boolean).unwrap(), Value::Boolean(false));
        }
        assert!(matches!(
            coerce("maybe", ValueType::Boolean),
            Err(NshError::TypeCoercion { .. })
        ));
    }

    #[test]
    fn number_rejects_non_numeric_text() {
        assert!(matches!(
            coerce("abc", ValueType::Number),
            Err(NshError::TypeCoercion { target: ValueType::Number, .. })
        ));
        assert!(coerce("1.5", ValueType::Number).is_err());
    }

    #[test]
    fn set_collapses_duplicates_and_brackets() {
        let expected: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(coerce("[a, b, a]", ValueType::Set).unwrap(), Value::Set(expected.clone()));
        assert_eq!(coerce("b,a", ValueType::Set).unwrap(), Value::Set(expected));
        assert_eq!(
            coerce("solo", ValueType::Set).unwrap(),
            Value::Set(BTreeSet::from(["solo".to_string()]))
        );
        assert_eq!(coerce("[]", ValueType::Set).unwrap(), Value::Set(BTreeSet::new()));
    }

    #[test]
    fn dict_requires_key_value_pairs() {
        assert!(coerce("a=1,b", ValueType::Dict).is_err());
    }

    #[test]
    fn size_parses_units_base_1024() {
        assert_eq!(coerce("512", ValueType::Size).unwrap(), Value::Size(512));
        assert_eq!(coerce("4K", ValueType::Size).unwrap(), Value::Size(4096));
        assert_eq!(coerce("1.5k", ValueType::Size).unwrap(), Value::Size(1536));
        assert_eq!(coerce("5GiB", ValueType::Size).unwrap(), Value::Size(5 << 30));
        assert_eq!(coerce("2TB", ValueType::Size).unwrap(), Value::Size(2 << 40));
        assert!(coerce("lots", ValueType::Size).is_err());
        assert!(coerce("-1K", ValueType::Size).is_err());
    }

    #[test]
    fn size_formatting_is_lossy() {
        assert_eq!(format_size(0), "0");
        assert_eq!(format_size(1023), "1023");
        assert_eq!(format_size(1536), "1.5K");
        assert_eq!(format_size((5 << 30) + 1), "5G");
        assert_eq!(format_size(3 << 40), "3T");
    }

    #[test]
    fn time_accepts_clock_and_iso_forms() {
        let t = coerce("2024-03-01T10:20:30Z", ValueType::Time).unwrap();
        assert_eq!(t.to_string(), "2024-03-01 10:20:30");

        let midnight = coerce("2024-03-01", ValueType::Time).unwrap();
        assert_eq!(midnight.to_string(), "2024-03-01 00:00:00");

        let clock = coerce("12:30", ValueType::Time).unwrap();
        assert!(clock.to_string().ends_with("12:30:00"));

        assert!(coerce("half past", ValueType::Time).is_err());
    }

    #[test]
    fn timedelta_parses_hours_minutes_seconds() {
        assert_eq!(parse_timedelta("2:00").unwrap(), TimeDelta::try_hours(2).unwrap());
        assert_eq!(parse_timedelta("0:01:30").unwrap(), TimeDelta::try_seconds(90).unwrap());
        assert!(parse_timedelta("2").is_err());
        assert!(parse_timedelta("1:75").is_err());
    }

    #[test]
    fn timedelta_rejects_overflowing_hours() {
        let err = parse_timedelta("9999999999999999:00").unwrap_err();
        assert!(matches!(err, NshError::TypeCoercion { .. }));
        assert!(parse_timedelta("99999999999999999999:00").is_err());
    }

    #[test]
    fn from_json_respects_target_type() {
        assert_eq!(Value::from_json(&json!(null), ValueType::Number).unwrap(), Value::Null);
        assert_eq!(Value::from_json(&json!(3), ValueType::Number).unwrap(), Value::Number(3));
        assert_eq!(Value::from_json(&json!("3"), ValueType::Number).unwrap(), Value::Number(3));
        assert_eq!(
            Value::from_json(&json!(["x", 1]), ValueType::Set).unwrap(),
            Value::Set(BTreeSet::from(["x".to_string(), "1".to_string()]))
        );
        assert_eq!(
            Value::from_json(&json!(2048), ValueType::Size).unwrap(),
            Value::Size(2048)
        );
        assert!(Value::from_json(&json!(true), ValueType::Number).is_err());
    }

    #[test]
    fn to_json_is_the_inverse_of_from_json() {
        let t = coerce("2024-03-01 10:20:30", ValueType::Time).unwrap();
        assert_eq!(t.to_json(), json!("2024-03-01T10:20:30Z"));
        assert_eq!(Value::from_json(&t.to_json(), ValueType::Time).unwrap(), t);
        assert_eq!(Value::Boolean(true).to_json(), json!(true));
        assert_eq!(Value::Size(10).to_json(), json!(10));
    }
}
