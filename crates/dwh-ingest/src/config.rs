//! Ingestion configuration
//!
//! Settings are read from the environment (a `.env` file is loaded first when
//! present). Every value has a default suitable for the production APIs, so
//! jobs normally only set credentials-related variables.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default base URL of the SSB classification API (KLASS v1).
pub const DEFAULT_SSB_API_URL: &str = "https://data.ssb.no/api/klass/v1";

/// Default base URL of the BRREG Enhetsregisteret API.
pub const DEFAULT_BRREG_API_URL: &str = "https://data.brreg.no/enhetsregisteret/api";

/// Default Secret Manager endpoint.
pub const DEFAULT_SECRET_MANAGER_URL: &str = "https://secretmanager.googleapis.com";

/// Default GCE metadata server, used for access tokens.
pub const DEFAULT_GCP_METADATA_URL: &str = "http://metadata.google.internal";

/// Default BigQuery REST endpoint.
pub const DEFAULT_BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com";

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 100;

/// Default timeout for a single Kafka poll in seconds.
pub const DEFAULT_KAFKA_POLL_TIMEOUT_SECS: u64 = 10;

/// Default number of records per Kafka batch.
pub const DEFAULT_KAFKA_BATCH_SIZE: usize = 1000;

/// Where secrets are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecretBackend {
    /// Environment variables holding JSON documents
    #[default]
    Env,
    /// Google Secret Manager
    Gcp,
}

impl std::str::FromStr for SecretBackend {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "env" => Ok(SecretBackend::Env),
            "gcp" | "secretmanager" => Ok(SecretBackend::Gcp),
            other => Err(IngestError::config(format!("Invalid SECRET_BACKEND: {other}"))),
        }
    }
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub ssb_api_url: String,
    pub brreg_api_url: String,
    pub http_timeout_secs: u64,
    pub gcp: GcpConfig,
    pub kafka: KafkaSettings,
}

/// Google Cloud configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    /// Project holding secrets and BigQuery datasets
    pub project: Option<String>,
    pub secret_backend: SecretBackend,
    pub secret_manager_url: String,
    pub metadata_url: String,
    pub bigquery_api_url: String,
}

/// Kafka consumption settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSettings {
    pub poll_timeout_secs: u64,
    pub batch_size: usize,
    /// Name of the secret holding broker and registry credentials
    pub credentials_secret: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ssb_api_url: DEFAULT_SSB_API_URL.to_string(),
            brreg_api_url: DEFAULT_BRREG_API_URL.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            gcp: GcpConfig {
                project: None,
                secret_backend: SecretBackend::Env,
                secret_manager_url: DEFAULT_SECRET_MANAGER_URL.to_string(),
                metadata_url: DEFAULT_GCP_METADATA_URL.to_string(),
                bigquery_api_url: DEFAULT_BIGQUERY_API_URL.to_string(),
            },
            kafka: KafkaSettings {
                poll_timeout_secs: DEFAULT_KAFKA_POLL_TIMEOUT_SECS,
                batch_size: DEFAULT_KAFKA_BATCH_SIZE,
                credentials_secret: "KAFKA".to_string(),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| IngestError::config(format!("{key} has invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

impl IngestConfig {
    /// Load configuration from `.env` and environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            ssb_api_url: env_or("SSB_API_URL", DEFAULT_SSB_API_URL),
            brreg_api_url: env_or("BRREG_API_URL", DEFAULT_BRREG_API_URL),
            http_timeout_secs: env_parse("DWH_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            gcp: GcpConfig {
                project: std::env::var("GCP_PROJECT").ok(),
                secret_backend: env_parse("SECRET_BACKEND", SecretBackend::Env)?,
                secret_manager_url: env_or("SECRET_MANAGER_URL", DEFAULT_SECRET_MANAGER_URL),
                metadata_url: env_or("GCP_METADATA_URL", DEFAULT_GCP_METADATA_URL),
                bigquery_api_url: env_or("BIGQUERY_API_URL", DEFAULT_BIGQUERY_API_URL),
            },
            kafka: KafkaSettings {
                poll_timeout_secs: env_parse("KAFKA_POLL_TIMEOUT_SECS", DEFAULT_KAFKA_POLL_TIMEOUT_SECS)?,
                batch_size: env_parse("KAFKA_BATCH_SIZE", DEFAULT_KAFKA_BATCH_SIZE)?,
                credentials_secret: env_or("KAFKA_CREDENTIALS_SECRET", "KAFKA"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.http_timeout_secs == 0 {
            return Err(IngestError::config("DWH_HTTP_TIMEOUT_SECS must be greater than 0"));
        }
        if self.kafka.batch_size == 0 {
            return Err(IngestError::config("KAFKA_BATCH_SIZE must be greater than 0"));
        }
        if self.kafka.poll_timeout_secs == 0 {
            return Err(IngestError::config("KAFKA_POLL_TIMEOUT_SECS must be greater than 0"));
        }
        if self.gcp.secret_backend == SecretBackend::Gcp && self.gcp.project.is_none() {
            return Err(IngestError::config("GCP_PROJECT is required when SECRET_BACKEND=gcp"));
        }
        for (name, url) in [
            ("SSB_API_URL", &self.ssb_api_url),
            ("BRREG_API_URL", &self.brreg_api_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(IngestError::config(format!("{name} must be an http(s) URL")));
            }
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Build the shared HTTP client used by all REST integrations
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.http_timeout())
            .user_agent(concat!("dwh-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }
}

impl KafkaSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}
