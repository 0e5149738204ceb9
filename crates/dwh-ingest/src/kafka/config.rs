//! librdkafka client configuration

use crate::gcp::KafkaCredentials;
use rdkafka::ClientConfig;

/// Consumers never join a group; partitions are assigned manually.
pub const UNUSED_GROUP_ID: &str = "NOT_USED";

/// Broker and schema registry connection details
#[derive(Clone)]
pub struct KafkaEndpoint {
    pub brokers: String,
    pub tls: Option<TlsMaterial>,
    pub schema_registry_url: String,
    pub schema_registry_auth: Option<(String, String)>,
}

/// PEM encoded client key, certificate and CA
#[derive(Clone)]
pub struct TlsMaterial {
    pub private_key: String,
    pub certificate: String,
    pub ca: String,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for KafkaEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEndpoint")
            .field("brokers", &self.brokers)
            .field("tls", &self.tls)
            .field("schema_registry_url", &self.schema_registry_url)
            .field("schema_registry_user", &self.schema_registry_auth.as_ref().map(|(user, _)| user))
            .finish()
    }
}

impl KafkaEndpoint {
    /// Broker over SSL with registry basic auth, as provisioned in production
    pub fn from_credentials(credentials: &KafkaCredentials) -> Self {
        Self {
            brokers: credentials.brokers.clone(),
            tls: Some(TlsMaterial {
                private_key: credentials.private_key.clone(),
                certificate: credentials.certificate.clone(),
                ca: credentials.ca.clone(),
            }),
            schema_registry_url: credentials.schema_registry.clone(),
            schema_registry_auth: Some((
                credentials.schema_registry_user.clone(),
                credentials.schema_registry_password.clone(),
            )),
        }
    }

    /// Plaintext broker and unauthenticated registry, for local clusters
    pub fn plaintext(brokers: impl Into<String>, schema_registry_url: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            tls: None,
            schema_registry_url: schema_registry_url.into(),
            schema_registry_auth: None,
        }
    }

    /// Settings shared by every client
    pub fn admin_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        match &self.tls {
            Some(tls) => {
                config
                    .set("security.protocol", "SSL")
                    .set("ssl.key.pem", &tls.private_key)
                    .set("ssl.certificate.pem", &tls.certificate)
                    .set("ssl.ca.pem", &tls.ca);
            },
            None => {
                config.set("security.protocol", "PLAINTEXT");
            },
        }
        config
    }

    /// Consumer reading from the beginning with manual assignment, no commits
    /// and an event at the end of every partition
    pub fn consumer_config(&self) -> ClientConfig {
        let mut config = self.admin_config();
        config
            .set("group.id", UNUSED_GROUP_ID)
            .set("auto.offset.reset", "beginning")
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("api.version.request", "true")
            .set("enable.partition.eof", "true");
        config
    }
}
