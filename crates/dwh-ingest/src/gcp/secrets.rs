//! Secrets for database and Kafka access
//!
//! Every secret is a JSON object. In production they live in Google Secret
//! Manager; locally the same documents can be put in environment variables
//! (or a `.env` file) under the same names.

use crate::config::{IngestConfig, SecretBackend};
use crate::error::{IngestError, Result};
use crate::gcp::auth::{token_provider, AccessTokenProvider};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::debug;

/// Source of JSON secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Map<String, Value>>;
}

fn parse_secret(name: &str, raw: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(IngestError::secret(name, "not a JSON object")),
        Err(e) => Err(IngestError::secret(name, e)),
    }
}

// ============================================================================
// Environment backend
// ============================================================================

/// Reads the secret `NAME` from the environment variable `NAME`
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Map<String, Value>> {
        let raw = std::env::var(name).map_err(|e| IngestError::secret(name, e))?;
        parse_secret(name, raw.as_bytes())
    }
}

// ============================================================================
// Google Secret Manager backend
// ============================================================================

#[derive(Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

/// Reads the latest version of a secret from Google Secret Manager
pub struct GcpSecretManager {
    client: reqwest::Client,
    base_url: String,
    project: String,
    tokens: Box<dyn AccessTokenProvider>,
}

impl GcpSecretManager {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        project: impl Into<String>,
        tokens: Box<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            project: project.into(),
            tokens,
        }
    }

    fn access_url(&self, name: &str) -> String {
        format!(
            "{}/v1/projects/{}/secrets/{}/versions/latest:access",
            self.base_url.trim_end_matches('/'),
            self.project,
            name
        )
    }
}

#[async_trait]
impl SecretStore for GcpSecretManager {
    async fn get_secret(&self, name: &str) -> Result<Map<String, Value>> {
        let url = self.access_url(name);
        debug!(secret = %name, project = %self.project, "Accessing secret");
        let token = self.tokens.access_token().await?;
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(IngestError::secret(name, format!("HTTP {}", response.status())));
        }
        let body: AccessSecretVersionResponse = response
            .json()
            .await
            .map_err(|e| IngestError::decode(&url, e))?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(body.payload.data.as_bytes())
            .map_err(|e| IngestError::secret(name, e))?;
        parse_secret(name, &raw)
    }
}

/// Secret store selected by `SECRET_BACKEND`
pub fn secret_store_from_config(config: &IngestConfig) -> Result<Box<dyn SecretStore>> {
    match config.gcp.secret_backend {
        SecretBackend::Env => Ok(Box::new(EnvSecretStore)),
        SecretBackend::Gcp => {
            let project = config
                .gcp
                .project
                .clone()
                .ok_or_else(|| IngestError::config("GCP_PROJECT is not set"))?;
            let client = config.http_client()?;
            let tokens = token_provider(client.clone(), &config.gcp.metadata_url);
            Ok(Box::new(GcpSecretManager::new(
                client,
                &config.gcp.secret_manager_url,
                project,
                tokens,
            )))
        },
    }
}

// ============================================================================
// Typed credentials
// ============================================================================

/// Login for an Oracle user
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct OracleCredentials {
    pub user: String,
    pub pwd: String,
    pub host: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    pub service: String,
}

impl OracleCredentials {
    /// Easy Connect string, `host:port/service`
    pub fn connect_string(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.service)
    }

    /// User name to log in with; proxy logins connect as `user[schema]`
    pub fn login_user(&self, schema: &str, as_proxy: bool) -> String {
        if as_proxy {
            format!("{}[{}]", self.user, schema)
        } else {
            self.user.clone()
        }
    }
}

impl std::fmt::Debug for OracleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleCredentials")
            .field("user", &self.user)
            .field("pwd", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service", &self.service)
            .finish()
    }
}

fn port_from_number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }
    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Broker TLS material and schema registry login
#[derive(Clone, Deserialize)]
pub struct KafkaCredentials {
    #[serde(rename = "KAFKA_BROKERS")]
    pub brokers: String,
    #[serde(rename = "KAFKA_PRIVATE_KEY")]
    pub private_key: String,
    #[serde(rename = "KAFKA_CERTIFICATE")]
    pub certificate: String,
    #[serde(rename = "KAFKA_CA")]
    pub ca: String,
    #[serde(rename = "KAFKA_SCHEMA_REGISTRY")]
    pub schema_registry: String,
    #[serde(rename = "KAFKA_SCHEMA_REGISTRY_USER")]
    pub schema_registry_user: String,
    #[serde(rename = "KAFKA_SCHEMA_REGISTRY_PASSWORD")]
    pub schema_registry_password: String,
}

impl std::fmt::Debug for KafkaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaCredentials")
            .field("brokers", &self.brokers)
            .field("schema_registry", &self.schema_registry)
            .field("schema_registry_user", &self.schema_registry_user)
            .finish_non_exhaustive()
    }
}

/// Name of the secret holding the login for `schema`
pub fn oracle_secret_name(schema: &str) -> String {
    format!("ORACLE_{}", schema.to_uppercase())
}

/// Credentials for the oracle user with full access to `schema`
pub async fn get_oracle_user_credentials(store: &dyn SecretStore, schema: &str) -> Result<OracleCredentials> {
    let name = oracle_secret_name(schema);
    let secret = store.get_secret(&name).await?;
    serde_json::from_value(Value::Object(secret)).map_err(|e| IngestError::secret(name, e))
}

/// Kafka credentials stored under `secret_name`
pub async fn get_kafka_credentials(store: &dyn SecretStore, secret_name: &str) -> Result<KafkaCredentials> {
    let secret = store.get_secret(secret_name).await?;
    serde_json::from_value(Value::Object(secret)).map_err(|e| IngestError::secret(secret_name, e))
}
