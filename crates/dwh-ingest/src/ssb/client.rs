//! HTTP client for the KLASS API

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::ssb::models::{
    id_from_link, Classification, CodeChangeItem, CodeChanges, Correspondence, Verbatim, Version,
};
use chrono::NaiveDate;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

const ACCEPT: &str = "application/json;charset=UTF-8";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Client for `https://data.ssb.no/api/klass/v1`
#[derive(Debug, Clone)]
pub struct SsbClient {
    client: Client,
    base_url: String,
}

impl SsbClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        Ok(Self::new(config.http_client()?, &config.ssb_api_url))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &'static str,
        id: i64,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, ACCEPT)
            .query(query)
            .send()
            .await
            .map_err(|e| IngestError::ssb(resource, id, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(IngestError::ssb(resource, id, format!("HTTP {}", response.status())));
        }
        let body = response.bytes().await.map_err(|e| IngestError::ssb(resource, id, e))?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| IngestError::decode(url, e))
    }

    async fn get_required<T: DeserializeOwned>(
        &self,
        resource: &'static str,
        id: i64,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.get_json(resource, id, path, query)
            .await?
            .ok_or_else(|| IngestError::ssb(resource, id, "HTTP 404 Not Found"))
    }

    /// `/classifications/{id}`
    pub async fn get_classification(&self, classification_id: i64, include_future: bool) -> Result<Classification> {
        let mut classification: Classification = self
            .get_required(
                "classification",
                classification_id,
                &format!("/classifications/{classification_id}"),
                &[("includeFuture", include_future.to_string())],
            )
            .await?;
        classification.id.get_or_insert(classification_id);
        info!(
            classification_id,
            versions = classification.versions.len(),
            "Fetched SSB classification"
        );
        Ok(classification)
    }

    /// `/versions/{id}`
    ///
    /// The classification id is taken from the `classification` link when
    /// the API provides it.
    pub async fn get_classification_version(&self, version_id: i64) -> Result<Version> {
        let mut version: Version = self
            .get_required("version", version_id, &format!("/versions/{version_id}"), &[])
            .await?;
        version.id.get_or_insert(version_id);
        if version.classification_id.is_none() {
            version.classification_id = id_from_link(&version.links, "classification");
        }
        info!(
            version_id,
            items = version.classification_items.len(),
            "Fetched SSB classification version"
        );
        Ok(version)
    }

    /// `/correspondencetables/{id}`, with the classification ids of the
    /// source and target versions filled in
    pub async fn get_correspondence(&self, correspondence_id: i64) -> Result<Correspondence> {
        let mut correspondence: Correspondence = self
            .get_required(
                "correspondence",
                correspondence_id,
                &format!("/correspondencetables/{correspondence_id}"),
                &[],
            )
            .await?;
        correspondence.id.get_or_insert(correspondence_id);

        let source = self.get_classification_version(correspondence.source_id).await?;
        correspondence.source_classification_id = source.classification_id;
        correspondence.target_classification_id = if correspondence.target_id == correspondence.source_id {
            source.classification_id
        } else {
            self.get_classification_version(correspondence.target_id)
                .await?
                .classification_id
        };

        info!(
            correspondence_id,
            maps = correspondence.correspondence_maps.len(),
            "Fetched SSB correspondence table"
        );
        Ok(correspondence)
    }

    /// `/classifications/{id}/changes?from=&to=`
    ///
    /// The API answers 404 when there are no changes in the period.
    pub async fn get_changes_between_versions_in_classification(
        &self,
        classification_id: i64,
        from: NaiveDate,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Verbatim<CodeChangeItem>>> {
        let mut query = vec![("from", from.format(DATE_FORMAT).to_string())];
        if let Some(to) = to {
            query.push(("to", to.format(DATE_FORMAT).to_string()));
        }
        let changes: Option<CodeChanges> = self
            .get_json(
                "classification changes",
                classification_id,
                &format!("/classifications/{classification_id}/changes"),
                &query,
            )
            .await?;
        let changes = changes.unwrap_or_default().code_changes;
        info!(classification_id, %from, changes = changes.len(), "Fetched SSB code changes");
        Ok(changes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn version_body(id: i64, classification_id: i64) -> serde_json::Value {
        json!({
            "name": format!("Versjon {id}"),
            "validFrom": "2024-01-01",
            "lastModified": "2024-01-02T10:00:00.000+0000",
            "classificationItems": [],
            "_links": {
                "self": {"href": format!("https://data.ssb.no/api/klass/v1/versions/{id}")},
                "classification": {"href": format!("https://data.ssb.no/api/klass/v1/classifications/{classification_id}")}
            }
        })
    }

    #[tokio::test]
    async fn test_get_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/classifications/2"))
            .and(query_param("includeFuture", "true"))
            .and(header_eq("accept", ACCEPT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Standard for kjønn",
                "lastModified": "2024-01-02T10:00:00.000+0000",
                "versions": [{
                    "name": "Kjønn 2010",
                    "validFrom": "2010-01-01",
                    "lastModified": "2024-01-02T10:00:00.000+0000",
                    "_links": {"self": {"href": "https://data.ssb.no/api/klass/v1/versions/7"}}
                }],
                "_links": {"self": {"href": "https://data.ssb.no/api/klass/v1/classifications/2"}}
            })))
            .mount(&server)
            .await;

        let client = SsbClient::new(Client::new(), server.uri());
        let classification = client.get_classification(2, true).await.unwrap();
        assert_eq!(classification.classification_id(), Some(2));
        assert_eq!(classification.versions[0].version_id(), Some(7));
    }

    #[tokio::test]
    async fn test_get_version_resolves_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/versions/1984"))
            .respond_with(ResponseTemplate::new(200).set_body_json(version_body(1984, 104)))
            .mount(&server)
            .await;

        let client = SsbClient::new(Client::new(), server.uri());
        let version = client.get_classification_version(1984).await.unwrap();
        assert_eq!(version.classification_id, Some(104));
        assert_eq!(version.version_id(), Some(1984));
    }

    #[tokio::test]
    async fn test_get_correspondence_resolves_both_classifications() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/correspondencetables/900"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Næring - Sektor",
                "source": "SN2007",
                "sourceId": 30,
                "target": "Sektor 2012",
                "targetId": 40,
                "lastModified": "2024-01-02T10:00:00.000+0000",
                "correspondenceMaps": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/versions/30"))
            .respond_with(ResponseTemplate::new(200).set_body_json(version_body(30, 6)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/versions/40"))
            .respond_with(ResponseTemplate::new(200).set_body_json(version_body(40, 39)))
            .mount(&server)
            .await;

        let client = SsbClient::new(Client::new(), server.uri());
        let correspondence = client.get_correspondence(900).await.unwrap();
        assert_eq!(correspondence.source_classification_id, Some(6));
        assert_eq!(correspondence.target_classification_id, Some(39));
    }

    #[tokio::test]
    async fn test_changes_not_found_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/classifications/131/changes"))
            .and(query_param("from", "2024-01-01"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SsbClient::new(Client::new(), server.uri());
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let changes = client
            .get_changes_between_versions_in_classification(131, from, None)
            .await
            .unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_changes_with_upper_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/classifications/131/changes"))
            .and(query_param("from", "2023-01-01"))
            .and(query_param("to", "2024-01-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "codeChanges": [{
                    "oldCode": "0301", "oldName": "Oslo", "newCode": "0301", "newName": "Oslo kommune",
                    "changeOccurred": "2024-01-01"
                }]
            })))
            .mount(&server)
            .await;

        let client = SsbClient::new(Client::new(), server.uri());
        let changes = client
            .get_changes_between_versions_in_classification(
                131,
                NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 1),
            )
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_name.as_deref(), Some("Oslo kommune"));
    }

    #[tokio::test]
    async fn test_missing_version_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SsbClient::new(Client::new(), server.uri());
        let err = client.get_classification_version(1).await.unwrap_err();
        assert!(matches!(err, IngestError::Ssb { resource: "version", .. }));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = SsbClient::new(Client::new(), server.uri());
        let err = client.get_classification(2, false).await.unwrap_err();
        assert!(matches!(err, IngestError::Decode { .. }));
    }
}
