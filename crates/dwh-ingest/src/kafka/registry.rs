//! Confluent schema registry REST client

use crate::error::{IngestError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Registry error code for an unknown subject
pub const SUBJECT_NOT_FOUND: i64 = 40401;

/// Registry error code for an unknown subject version
pub const VERSION_NOT_FOUND: i64 = 40402;

#[derive(Debug, Deserialize)]
struct RegistryErrorBody {
    error_code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredSchema {
    pub schema: String,
    #[serde(default)]
    pub schema_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubjectVersion {
    pub subject: String,
    pub version: i64,
    pub id: u32,
    pub schema: String,
}

impl IngestError {
    /// True for "subject not found" and "version not found"
    pub fn is_registry_not_found(&self) -> bool {
        matches!(
            self,
            IngestError::SchemaRegistry { code, .. } if *code == SUBJECT_NOT_FOUND || *code == VERSION_NOT_FOUND
        )
    }
}

#[derive(Clone)]
pub struct SchemaRegistryClient {
    client: Client,
    base_url: String,
    auth: Option<(String, String)>,
}

impl std::fmt::Debug for SchemaRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistryClient")
            .field("base_url", &self.base_url)
            .field("user", &self.auth.as_ref().map(|(user, _)| user))
            .finish()
    }
}

impl SchemaRegistryClient {
    pub fn new(client: Client, base_url: impl Into<String>, auth: Option<(String, String)>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Schema registry request");
        let mut request = self.client.get(&url);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let (code, message) = match serde_json::from_slice::<RegistryErrorBody>(&body) {
                Ok(error) => (error.error_code, error.message),
                Err(_) => (i64::from(status.as_u16()), String::from_utf8_lossy(&body).into_owned()),
            };
            return Err(IngestError::SchemaRegistry {
                code,
                resource: path.to_string(),
                message,
            });
        }
        serde_json::from_slice(&body).map_err(|e| IngestError::decode(url, e))
    }

    /// `GET /schemas/ids/{id}`
    pub async fn get_schema(&self, schema_id: u32) -> Result<RegisteredSchema> {
        self.get(&format!("/schemas/ids/{schema_id}")).await
    }

    /// `GET /subjects/{subject}/versions`
    pub async fn get_versions(&self, subject: &str) -> Result<Vec<i64>> {
        self.get(&format!("/subjects/{subject}/versions")).await
    }

    /// `GET /subjects/{subject}/versions/{version}`
    pub async fn get_version(&self, subject: &str, version: i64) -> Result<SubjectVersion> {
        self.get(&format!("/subjects/{subject}/versions/{version}")).await
    }
}
