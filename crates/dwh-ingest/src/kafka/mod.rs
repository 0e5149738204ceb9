//! Kafka consumption with Confluent schema registry support
//!
//! Topics are read with manually assigned partitions and no consumer group
//! commits. Keys and values are decoded according to a [`SerializationType`]
//! and handed out as [`KafkaRecord`] batches by a [`TopicBatchReader`].

pub mod avro;
pub mod batch;
pub mod config;
pub mod connection;
pub mod record;
pub mod registry;
pub mod serialization;

pub use config::{KafkaEndpoint, TlsMaterial, UNUSED_GROUP_ID};
pub use connection::{KafkaConnection, ReadOptions, RecordCallback, TopicBatchReader};
pub use record::{KafkaRecord, MessageDecoder};
pub use registry::SchemaRegistryClient;
pub use serialization::SerializationType;
