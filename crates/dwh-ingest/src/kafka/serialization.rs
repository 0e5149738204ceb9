//! Message key/value formats and Confluent wire framing

use crate::error::{IngestError, Result};
use dwh_common::transforms::{bytes_to_string, json_bytes_to_string};
use serde::{Deserialize, Serialize};

/// Magic byte in front of every Confluent framed message
pub const CONFLUENT_MAGIC_BYTE: u8 = 0;

/// Magic byte plus a big-endian u32 schema id
pub const CONFLUENT_HEADER_SIZE: usize = 5;

/// How a message key or value is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SerializationType {
    /// UTF-8 text
    Str,
    /// Plain JSON document
    Json,
    /// JSON with Confluent framing
    ConfluentJson,
    /// Avro with Confluent framing, schema from the registry
    ConfluentAvro,
}

impl SerializationType {
    pub fn as_str(self) -> &'static str {
        match self {
            SerializationType::Str => "str",
            SerializationType::Json => "json",
            SerializationType::ConfluentJson => "confluent-json",
            SerializationType::ConfluentAvro => "confluent-avro",
        }
    }
}

impl std::fmt::Display for SerializationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SerializationType {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "str" => Ok(SerializationType::Str),
            "json" => Ok(SerializationType::Json),
            "confluent-json" => Ok(SerializationType::ConfluentJson),
            "confluent-avro" => Ok(SerializationType::ConfluentAvro),
            other => Err(IngestError::config(format!("Unknown serialization type: {other}"))),
        }
    }
}

/// Splits a Confluent framed message into schema id and payload
pub fn split_confluent_frame(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < CONFLUENT_HEADER_SIZE {
        return Err(IngestError::Deserialization(format!(
            "message of {} bytes is shorter than the Confluent header",
            data.len()
        )));
    }
    if data[0] != CONFLUENT_MAGIC_BYTE {
        return Err(IngestError::Deserialization(format!(
            "unexpected magic byte {}",
            data[0]
        )));
    }
    let schema_id = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    Ok((schema_id, &data[CONFLUENT_HEADER_SIZE..]))
}

/// Prepends the Confluent header to `payload`
pub fn confluent_frame(schema_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(CONFLUENT_HEADER_SIZE + payload.len());
    framed.push(CONFLUENT_MAGIC_BYTE);
    framed.extend_from_slice(&schema_id.to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

pub fn deserialize_str(data: &[u8]) -> Result<String> {
    bytes_to_string(data).map_err(|e| IngestError::Deserialization(e.to_string()))
}

pub fn deserialize_json(data: &[u8]) -> Result<String> {
    json_bytes_to_string(data).map_err(|e| IngestError::Deserialization(e.to_string()))
}

/// JSON documents carry their own schema; only the id is kept
pub fn deserialize_confluent_json(data: &[u8]) -> Result<(String, u32)> {
    let (schema_id, payload) = split_confluent_frame(data)?;
    Ok((deserialize_json(payload)?, schema_id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_split_confluent_frame() {
        let framed = confluent_frame(258, b"payload");
        assert_eq!(&framed[..5], &[0, 0, 0, 1, 2]);
        let (id, payload) = split_confluent_frame(&framed).unwrap();
        assert_eq!(id, 258);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_frame_errors() {
        assert!(split_confluent_frame(&[0, 0, 1]).is_err());
        assert!(split_confluent_frame(&[1, 0, 0, 0, 1, 42]).is_err());
        // an empty payload after a complete header is valid
        assert_eq!(split_confluent_frame(&[0, 0, 0, 0, 7]).unwrap(), (7, &[][..]));
    }

    #[test]
    fn test_confluent_json() {
        let framed = confluent_frame(3, br#"{"a":1,"b":[true,null]}"#);
        let (text, id) = deserialize_confluent_json(&framed).unwrap();
        assert_eq!(id, 3);
        assert_eq!(text, r#"{"a": 1, "b": [true, null]}"#);
    }

    #[test]
    fn test_invalid_utf8_is_a_deserialization_error() {
        let err = deserialize_str(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, IngestError::Deserialization(_)));
    }

    #[test]
    fn test_serialization_type_names() {
        for kind in [
            SerializationType::Str,
            SerializationType::Json,
            SerializationType::ConfluentJson,
            SerializationType::ConfluentAvro,
        ] {
            assert_eq!(kind.as_str().parse::<SerializationType>().unwrap(), kind);
        }
        assert!("avro".parse::<SerializationType>().is_err());
    }
}
