//! Consumed messages as flat records

use crate::error::{IngestError, Result};
use crate::kafka::avro::{decode_avro_to_json_string, parse_schema};
use crate::kafka::registry::SchemaRegistryClient;
use crate::kafka::serialization::{
    deserialize_confluent_json, deserialize_json, deserialize_str, split_confluent_frame, SerializationType,
};
use apache_avro::Schema;
use dwh_common::checksum::bytes_to_sha256_hash;
use dwh_common::Row;
use rdkafka::message::{Headers, Message, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// One message with key and value decoded to text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaRecord {
    #[serde(rename = "KAFKA_KEY")]
    pub key: Option<String>,
    #[serde(rename = "KAFKA_KEY_HASH")]
    pub key_hash: Option<String>,
    #[serde(rename = "KAFKA_KEY_SCHEMA")]
    pub key_schema: Option<u32>,
    #[serde(rename = "KAFKA_VALUE")]
    pub value: Option<String>,
    #[serde(rename = "KAFKA_VALUE_HASH")]
    pub value_hash: Option<String>,
    #[serde(rename = "KAFKA_VALUE_SCHEMA")]
    pub value_schema: Option<u32>,
    #[serde(rename = "KAFKA_TOPIC")]
    pub topic: String,
    #[serde(rename = "KAFKA_OFFSET")]
    pub offset: i64,
    #[serde(rename = "KAFKA_PARTITION")]
    pub partition: i32,
    #[serde(rename = "KAFKA_TIMESTAMP")]
    pub timestamp: Option<i64>,
    #[serde(rename = "KAFKA_TIMESTAMP_TYPE")]
    pub timestamp_type: Option<String>,
    #[serde(rename = "KAFKA_HEADERS")]
    pub headers: Option<String>,
}

impl KafkaRecord {
    /// Row with the upper-case column names used by the staging tables
    pub fn to_row(&self) -> Row {
        Row::new()
            .with("KAFKA_KEY", self.key.clone())
            .with("KAFKA_KEY_HASH", self.key_hash.clone())
            .with("KAFKA_KEY_SCHEMA", self.key_schema)
            .with("KAFKA_VALUE", self.value.clone())
            .with("KAFKA_VALUE_HASH", self.value_hash.clone())
            .with("KAFKA_VALUE_SCHEMA", self.value_schema)
            .with("KAFKA_TOPIC", self.topic.as_str())
            .with("KAFKA_OFFSET", self.offset)
            .with("KAFKA_PARTITION", self.partition)
            .with("KAFKA_TIMESTAMP", self.timestamp)
            .with("KAFKA_TIMESTAMP_TYPE", self.timestamp_type.clone())
            .with("KAFKA_HEADERS", self.headers.clone())
    }
}

/// Timestamp value and whether it was set by the producer or the broker
pub fn timestamp_parts(timestamp: Timestamp) -> (Option<i64>, Option<String>) {
    match timestamp {
        Timestamp::NotAvailable => (None, None),
        Timestamp::CreateTime(ms) => (Some(ms), Some("SOURCE".to_string())),
        Timestamp::LogAppendTime(ms) => (Some(ms), Some("BROKER".to_string())),
    }
}

/// `name:hexvalue` pairs joined by commas, None without headers
pub fn format_headers<M: Message>(message: &M) -> Option<String> {
    let headers = message.headers()?;
    if headers.count() == 0 {
        return None;
    }
    let formatted: Vec<String> = headers
        .iter()
        .map(|header| format!("{}:{}", header.key, hex::encode(header.value.unwrap_or_default())))
        .collect();
    Some(formatted.join(","))
}

/// Decodes keys and values, caching registry schemas by id
pub struct MessageDecoder {
    registry: SchemaRegistryClient,
    schemas: HashMap<u32, Schema>,
}

impl MessageDecoder {
    pub fn new(registry: SchemaRegistryClient) -> Self {
        Self {
            registry,
            schemas: HashMap::new(),
        }
    }

    pub fn with_schemas(mut self, schemas: HashMap<u32, Schema>) -> Self {
        self.schemas.extend(schemas);
        self
    }

    pub fn cached_schema_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.schemas.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    async fn schema(&mut self, schema_id: u32) -> Result<&Schema> {
        if !self.schemas.contains_key(&schema_id) {
            debug!(schema_id, "Fetching schema missing from cache");
            let registered = self.registry.get_schema(schema_id).await?;
            let schema = parse_schema(&registered.schema)?;
            self.schemas.insert(schema_id, schema);
        }
        self.schemas
            .get(&schema_id)
            .ok_or_else(|| IngestError::Deserialization(format!("schema {schema_id} missing from cache")))
    }

    /// Text and schema id (for Confluent framed data) of `data`
    pub async fn decode(&mut self, kind: SerializationType, data: &[u8]) -> Result<(String, Option<u32>)> {
        match kind {
            SerializationType::Str => Ok((deserialize_str(data)?, None)),
            SerializationType::Json => Ok((deserialize_json(data)?, None)),
            SerializationType::ConfluentJson => {
                let (text, schema_id) = deserialize_confluent_json(data)?;
                Ok((text, Some(schema_id)))
            },
            SerializationType::ConfluentAvro => {
                let (schema_id, payload) = split_confluent_frame(data)?;
                let schema = self.schema(schema_id).await?;
                let text = decode_avro_to_json_string(schema, payload)
                    .map_err(|e| IngestError::Deserialization(format!("schema {schema_id}: {e}")))?;
                Ok((text, Some(schema_id)))
            },
        }
    }

    /// Hash of the raw bytes, plus text: decoded when `kind` is set, hex otherwise
    async fn field(
        &mut self,
        kind: Option<SerializationType>,
        data: Option<&[u8]>,
    ) -> Result<(Option<String>, Option<String>, Option<u32>)> {
        let Some(data) = data else {
            return Ok((None, None, None));
        };
        let hash = bytes_to_sha256_hash(data);
        let (text, schema_id) = match kind {
            Some(kind) => self.decode(kind, data).await?,
            None => (hex::encode(data), None),
        };
        Ok((Some(text), Some(hash), schema_id))
    }

    pub async fn record_from_message<M: Message>(
        &mut self,
        message: &M,
        key_type: Option<SerializationType>,
        value_type: Option<SerializationType>,
    ) -> Result<KafkaRecord> {
        let (key, key_hash, key_schema) = self.field(key_type, message.key()).await?;
        let (value, value_hash, value_schema) = self.field(value_type, message.payload()).await?;
        let (timestamp, timestamp_type) = timestamp_parts(message.timestamp());
        Ok(KafkaRecord {
            key,
            key_hash,
            key_schema,
            value,
            value_hash,
            value_schema,
            topic: message.topic().to_string(),
            offset: message.offset(),
            partition: message.partition(),
            timestamp,
            timestamp_type,
            headers: format_headers(message),
        })
    }
}
