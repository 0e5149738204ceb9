//! Google Cloud integrations
//!
//! - [`auth`]: OAuth access tokens (static or from the metadata server)
//! - [`secrets`]: JSON secrets from Secret Manager or the environment
//! - [`bigquery`]: read query results as rows

pub mod auth;
pub mod bigquery;
pub mod secrets;

pub use auth::{AccessTokenProvider, MetadataServerToken, StaticToken};
pub use bigquery::BigQueryClient;
pub use secrets::{
    get_kafka_credentials, get_oracle_user_credentials, secret_store_from_config, EnvSecretStore,
    GcpSecretManager, KafkaCredentials, OracleCredentials, SecretStore,
};
