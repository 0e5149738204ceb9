//! Data transforms shared by the loaders
//!
//! Datetimes written to the warehouse are naive (no offset). Depending on the
//! column they are either Norwegian wall-clock time (`Europe/Oslo`) or UTC.
//! Input strings without an offset are interpreted as UTC.

use crate::error::{DwhError, Result};
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Europe::Oslo;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io;
use std::sync::OnceLock;

/// Code used when a string has no word characters at all
pub const UNKNOWN_CODE: &str = "UKJENT";

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

// ============================================================================
// JSON lookup and flattening
// ============================================================================

/// Walks `path` through nested objects (by key) and arrays (by index).
///
/// Returns `None` as soon as a step is missing.
pub fn find_in_json<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(*key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Recursively flattens nested objects, joining keys with `sep`.
///
/// With `flatten_lists` arrays are flattened as well, using the element
/// index as key; otherwise they are kept as values.
pub fn flatten_json(mapping: &Map<String, Value>, sep: &str, flatten_lists: bool) -> Map<String, Value> {
    let mut flat = Map::new();
    flatten_into(&mut flat, mapping, "", sep, flatten_lists);
    flat
}

fn flatten_into(flat: &mut Map<String, Value>, mapping: &Map<String, Value>, parent: &str, sep: &str, flatten_lists: bool) {
    for (key, value) in mapping {
        let flat_key = if parent.is_empty() {
            key.clone()
        } else {
            format!("{parent}{sep}{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(flat, inner, &flat_key, sep, flatten_lists),
            Value::Array(items) if flatten_lists => {
                let indexed = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (i.to_string(), item.clone()))
                    .collect::<Map<_, _>>();
                flatten_into(flat, &indexed, &flat_key, sep, flatten_lists);
            },
            _ => {
                flat.insert(flat_key, value.clone());
            },
        }
    }
}

// ============================================================================
// Datetime conversion
// ============================================================================

/// Parses a datetime or date string into an aware UTC datetime.
///
/// Accepts RFC 3339, ISO 8601 with a `+hhmm` offset, naive datetimes and
/// plain dates. Naive input is taken to be UTC.
pub fn parse_datetime(string: &str) -> Result<DateTime<Utc>> {
    let trimmed = string.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        Ok(date) => Ok(date.and_time(chrono::NaiveTime::MIN).and_utc()),
        Err(e) => Err(DwhError::invalid_datetime(string, e)),
    }
}

/// Parses the string, converts it to Norwegian time and strips the timezone.
///
/// `"2022-05-05T05:05:05+01:00"` becomes `2022-05-05T06:05:05` and
/// `"2022-05-05"` becomes `2022-05-05T02:00:00`.
pub fn string_to_naive_norwegian_datetime(string: &str) -> Result<NaiveDateTime> {
    Ok(parse_datetime(string)?.with_timezone(&Oslo).naive_local())
}

/// Parses the string, converts it to UTC and strips the timezone.
pub fn string_to_naive_utc0_datetime(string: &str) -> Result<NaiveDateTime> {
    Ok(parse_datetime(string)?.naive_utc())
}

/// Converts seconds since the unix epoch to a naive UTC datetime.
pub fn epoch_to_naive_utc0_datetime(epoch: f64) -> Result<NaiveDateTime> {
    let secs = epoch.floor();
    let nanos = ((epoch - secs) * 1e9).round() as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| DwhError::invalid_datetime(epoch.to_string(), "epoch out of range"))
}

/// Converts an aware datetime to naive Norwegian time.
pub fn datetime_to_naive_norwegian_datetime(dt: &DateTime<FixedOffset>) -> NaiveDateTime {
    dt.with_timezone(&Oslo).naive_local()
}

/// Converts naive Norwegian wall-clock time to naive UTC.
///
/// During the autumn fold the earlier instant is chosen. Times inside the
/// spring gap do not exist and are rejected.
pub fn naive_norwegian_datetime_to_naive_utc0_datetime(dt: NaiveDateTime) -> Result<NaiveDateTime> {
    match Oslo.from_local_datetime(&dt) {
        LocalResult::Single(local) => Ok(local.naive_utc()),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.naive_utc()),
        LocalResult::None => Err(DwhError::invalid_datetime(
            dt.to_string(),
            "does not exist in Europe/Oslo",
        )),
    }
}

// ============================================================================
// Codes
// ============================================================================

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+").unwrap_or_else(|_| unreachable!("static pattern")))
}

/// Converts a string to a code conforming to the warehouse standard.
///
/// `"/&$  ØrkEn Rotte# *;-"` becomes `ORKEN_ROTTE`; a string without any
/// word characters becomes [`UNKNOWN_CODE`].
pub fn string_to_code(string: &str) -> String {
    let upper = string
        .to_uppercase()
        .replace('Æ', "A")
        .replace('Ø', "O")
        .replace('Å', "AA");
    let code = word_regex()
        .find_iter(&upper)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join("_");
    if code.is_empty() {
        UNKNOWN_CODE.to_string()
    } else {
        code
    }
}

// ============================================================================
// JSON and bytes
// ============================================================================

/// Formatter using `", "` and `": "` separators.
///
/// Serialized documents are hashed, so the layout must stay byte-for-byte
/// stable with what is already stored in the warehouse.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Returns the json object parsed from the string
pub fn string_to_json(string: &str) -> Result<Value> {
    Ok(serde_json::from_str(string)?)
}

/// Serializes to a json string with spaced separators and non-ASCII kept as is.
///
/// `{"x": 1}` serializes as `{"x": 1}`.
pub fn json_to_string<T: Serialize + ?Sized>(data: &T) -> String {
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, SpacedFormatter);
    match data.serialize(&mut serializer) {
        // serde_json only ever writes valid UTF-8
        Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
        Err(_) => String::from("null"),
    }
}

/// Returns the utf-8 decoded string
pub fn bytes_to_string(data: &[u8]) -> Result<String> {
    Ok(String::from_utf8(data.to_vec())?)
}

/// Returns the utf-8 encoded string as bytes
pub fn string_to_bytes(string: &str) -> Vec<u8> {
    string.as_bytes().to_vec()
}

/// Parses json bytes and re-serializes them with [`json_to_string`]
pub fn json_bytes_to_string(data: &[u8]) -> Result<String> {
    let value: Value = serde_json::from_slice(data)?;
    Ok(json_to_string(&value))
}
