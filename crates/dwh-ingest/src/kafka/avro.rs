//! Avro datum decoding and rendering to JSON
//!
//! Logical types are rendered as readable strings: dates as `YYYY-MM-DD`,
//! timestamps in ISO 8601, decimals in plain notation. Bytes and fixed values
//! become hex. Unions render as their inner value and enums as their symbol.

use crate::error::Result;
use apache_avro::schema::Schema;
use apache_avro::types::Value as AvroValue;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat};
use dwh_common::transforms::json_to_string;
use serde_json::{Map, Number, Value};

/// Decodes one schemaless Avro datum and serializes it as JSON text
pub fn decode_avro_to_json_string(schema: &Schema, payload: &[u8]) -> Result<String> {
    let mut reader = payload;
    let value = apache_avro::from_avro_datum(schema, &mut reader, None)?;
    Ok(json_to_string(&avro_to_json(&value, Some(schema))))
}

/// Parses a schema string from the registry
pub fn parse_schema(schema: &str) -> Result<Schema> {
    Ok(Schema::parse_str(schema)?)
}

fn decimal_scale(schema: Option<&Schema>) -> usize {
    match schema {
        Some(Schema::Decimal(decimal)) => decimal.scale,
        _ => 0,
    }
}

fn record_field_schema<'a>(schema: Option<&'a Schema>, index: usize) -> Option<&'a Schema> {
    match schema {
        Some(Schema::Record(record)) => record.fields.get(index).map(|field| &field.schema),
        _ => None,
    }
}

fn union_variant_schema(schema: Option<&Schema>, index: u32) -> Option<&Schema> {
    match schema {
        Some(Schema::Union(union)) => union.variants().get(index as usize),
        _ => None,
    }
}

fn array_item_schema(schema: Option<&Schema>) -> Option<&Schema> {
    match schema {
        Some(Schema::Array(array)) => Some(array.items.as_ref()),
        _ => None,
    }
}

fn map_value_schema(schema: Option<&Schema>) -> Option<&Schema> {
    match schema {
        Some(Schema::Map(map)) => Some(map.types.as_ref()),
        _ => None,
    }
}

/// Big-endian two's complement unscaled value with `scale` decimals
fn format_decimal(unscaled: &[u8], scale: usize) -> String {
    if unscaled.is_empty() || unscaled.len() > 16 {
        return hex::encode(unscaled);
    }
    let negative = unscaled[0] & 0x80 != 0;
    let mut buffer = if negative { [0xffu8; 16] } else { [0u8; 16] };
    buffer[16 - unscaled.len()..].copy_from_slice(unscaled);
    let value = i128::from_be_bytes(buffer);

    let digits = value.unsigned_abs().to_string();
    let sign = if value < 0 { "-" } else { "" };
    if scale == 0 {
        return format!("{sign}{digits}");
    }
    let padded = format!("{digits:0>width$}", width = scale + 1);
    let (whole, fraction) = padded.split_at(padded.len() - scale);
    format!("{sign}{whole}.{fraction}")
}

fn date_string(days: i32) -> Value {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(i64::from(days))))
        .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

fn timestamp_string(datetime: Option<DateTime<chrono::Utc>>, local: bool) -> Value {
    match datetime {
        Some(dt) if local => Value::String(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
        None => Value::Null,
    }
}

fn time_string(micros: i64) -> Value {
    let secs = micros.div_euclid(1_000_000);
    let nanos = micros.rem_euclid(1_000_000) * 1_000;
    NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, nanos as u32)
        .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))
        .unwrap_or(Value::Null)
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

/// Renders an Avro value as JSON, using `schema` for decimal scales
pub fn avro_to_json(value: &AvroValue, schema: Option<&Schema>) -> Value {
    match value {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(b) => Value::Bool(*b),
        AvroValue::Int(i) => Value::from(*i),
        AvroValue::Long(l) => Value::from(*l),
        AvroValue::Float(f) => float(f64::from(*f)),
        AvroValue::Double(d) => float(*d),
        AvroValue::Bytes(bytes) | AvroValue::Fixed(_, bytes) => Value::String(hex::encode(bytes)),
        AvroValue::String(s) => Value::String(s.clone()),
        AvroValue::Enum(_, symbol) => Value::String(symbol.clone()),
        AvroValue::Uuid(uuid) => Value::String(uuid.to_string()),
        AvroValue::Union(index, inner) => avro_to_json(inner, union_variant_schema(schema, *index)),
        AvroValue::Array(items) => {
            let item_schema = array_item_schema(schema);
            Value::Array(items.iter().map(|item| avro_to_json(item, item_schema)).collect())
        },
        AvroValue::Map(entries) => {
            let value_schema = map_value_schema(schema);
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .filter_map(|key| entries.get(key).map(|v| (key.clone(), avro_to_json(v, value_schema))))
                    .collect::<Map<String, Value>>(),
            )
        },
        AvroValue::Record(fields) => Value::Object(
            fields
                .iter()
                .enumerate()
                .map(|(index, (name, field))| (name.clone(), avro_to_json(field, record_field_schema(schema, index))))
                .collect(),
        ),
        AvroValue::Date(days) => date_string(*days),
        AvroValue::TimeMillis(millis) => time_string(i64::from(*millis) * 1_000),
        AvroValue::TimeMicros(micros) => time_string(*micros),
        AvroValue::TimestampMillis(millis) => timestamp_string(DateTime::from_timestamp_millis(*millis), false),
        AvroValue::TimestampMicros(micros) => timestamp_string(DateTime::from_timestamp_micros(*micros), false),
        AvroValue::TimestampNanos(nanos) => timestamp_string(Some(DateTime::from_timestamp_nanos(*nanos)), false),
        AvroValue::LocalTimestampMillis(millis) => timestamp_string(DateTime::from_timestamp_millis(*millis), true),
        AvroValue::LocalTimestampMicros(micros) => timestamp_string(DateTime::from_timestamp_micros(*micros), true),
        AvroValue::LocalTimestampNanos(nanos) => timestamp_string(Some(DateTime::from_timestamp_nanos(*nanos)), true),
        AvroValue::Decimal(decimal) => match Vec::<u8>::try_from(decimal) {
            Ok(unscaled) => Value::String(format_decimal(&unscaled, decimal_scale(schema))),
            Err(_) => Value::Null,
        },
        AvroValue::BigDecimal(big) => Value::String(big.to_string()),
        #[allow(unreachable_patterns)]
        other => Value::String(format!("{other:?}")),
    }
}
