//! Error types for the ETL clients
//!
//! Every variant names the resource that failed (classification id, orgnr,
//! topic, schema id, table) so a failing job can be diagnosed from its log.

use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("SSB {resource} {id} could not be fetched: {reason}")]
    Ssb {
        resource: &'static str,
        id: String,
        reason: String,
    },

    #[error("BRREG unit {0} not found")]
    UnitNotFound(String),

    #[error("BRREG unit {0} has no updates")]
    UnitHasNoUpdates(String),

    #[error("Schema registry error {code} for {resource}: {message}")]
    SchemaRegistry {
        code: i64,
        resource: String,
        message: String,
    },

    #[error("Topic {0} not found")]
    TopicNotFound(String),

    #[error("Failed to deserialize kafka message: {0}")]
    Deserialization(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),

    #[error("Secret {name} is unavailable: {reason}")]
    Secret { name: String, reason: String },

    #[error("BigQuery error: {0}")]
    BigQuery(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Workflow with target {0} not found")]
    WorkflowNotFound(String),

    #[error("Failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Network request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] dwh_common::DwhError),
}

impl IngestError {
    pub fn ssb(resource: &'static str, id: impl ToString, reason: impl ToString) -> Self {
        Self::Ssb {
            resource,
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn secret(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Secret {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn database(reason: impl ToString) -> Self {
        Self::Database(reason.to_string())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }
}
