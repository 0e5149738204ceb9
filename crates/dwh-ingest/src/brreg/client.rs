//! HTTP client for Enhetsregisteret units and their updates

use crate::brreg::rows::{
    fake_update_date, make_fake_unit, make_fake_unit_update, make_row,
    naive_utc0_datetime_to_brreg_date_str, UNKNOWN_CHANGE,
};
use crate::brreg::{UnitType, API_VERSION};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use chrono::NaiveDateTime;
use dwh_common::Row;
use reqwest::{header, Client};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Update endpoints only exist in v1
const UPDATE_API_VERSION: i64 = 1;

fn accept_header(name: &str, response_type: &str, api_version: i64) -> String {
    format!("application/vnd.brreg.enhetsregisteret.{name}.v{api_version}+{response_type};charset=UTF-8")
}

/// Client for one unit type (`Enhet` or `Underenhet`)
#[derive(Debug, Clone)]
pub struct BrregUnitApi {
    pub(crate) client: Client,
    pub(crate) unit_type: UnitType,
    base_url: String,
    download_date: NaiveDateTime,
}

impl BrregUnitApi {
    /// `download_date` is naive Norwegian time, written to `lastet_dato`
    pub fn new(client: Client, base_url: impl Into<String>, unit_type: UnitType, download_date: NaiveDateTime) -> Self {
        Self {
            client,
            unit_type,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            download_date,
        }
    }

    pub fn from_config(config: &IngestConfig, unit_type: UnitType, download_date: NaiveDateTime) -> Result<Self> {
        Ok(Self::new(config.http_client()?, &config.brreg_api_url, unit_type, download_date))
    }

    pub fn set_row_download_date(&mut self, date: NaiveDateTime) {
        self.download_date = date;
    }

    pub fn download_date(&self) -> NaiveDateTime {
        self.download_date
    }

    fn unit_url(&self) -> String {
        format!("{}/{}er", self.base_url, self.unit_type.path_name())
    }

    fn update_url(&self) -> String {
        format!("{}/oppdateringer/{}er", self.base_url, self.unit_type.path_name())
    }

    pub(crate) fn file_url(&self) -> String {
        format!("{}/lastned", self.unit_url())
    }

    pub(crate) fn file_accept(&self) -> String {
        accept_header(self.unit_type.path_name(), "gzip", API_VERSION)
    }

    fn updates_list_key(&self) -> String {
        format!("oppdaterte{}er", self.unit_type.as_str())
    }

    /// Unit document for `orgnr`
    ///
    /// Deleted units answer with an error status and no document. With
    /// `fake_if_not_found` a document holding only the orgnr is returned.
    pub async fn get_unit(&self, orgnr: &str, fake_if_not_found: bool) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/{}", self.unit_url(), orgnr))
            .header(header::ACCEPT, accept_header(self.unit_type.path_name(), "json", API_VERSION))
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(%orgnr, status = %response.status(), "Unit may have been deleted");
        }
        let body = response.bytes().await?;
        match serde_json::from_slice::<Value>(&body) {
            Ok(document) => Ok(document),
            Err(_) if fake_if_not_found => {
                warn!(%orgnr, "Unit is entirely gone, faking document");
                Ok(make_fake_unit(orgnr))
            },
            Err(_) => Err(IngestError::UnitNotFound(orgnr.to_string())),
        }
    }

    /// Pages through the update endpoint, starting at `oppdateringsid=1`
    async fn fetch_updates(&self, filter: (&str, String)) -> Result<Vec<Value>> {
        let key = self.updates_list_key();
        let accept = accept_header(&format!("oppdatering.{}", self.unit_type.path_name()), "json", UPDATE_API_VERSION);
        let mut next_id: i64 = 1;
        let mut all_updates = Vec::new();

        loop {
            let response = self
                .client
                .get(self.update_url())
                .header(header::ACCEPT, &accept)
                .query(&[(filter.0, filter.1.clone()), ("oppdateringsid", next_id.to_string())])
                .send()
                .await?
                .error_for_status()?;
            let document: Value = response.json().await?;
            let updates = match document
                .get("_embedded")
                .and_then(|embedded| embedded.get(&key))
                .and_then(Value::as_array)
            {
                Some(updates) if !updates.is_empty() => updates.clone(),
                _ => {
                    debug!(filter = filter.0, "No further updates found");
                    break;
                },
            };
            // updates are sorted ascending, so the next page starts after the last id
            let last_id = updates
                .last()
                .and_then(|u| u.get("oppdateringsid"))
                .and_then(Value::as_i64)
                .ok_or_else(|| IngestError::Deserialization("BRREG update is missing 'oppdateringsid'".into()))?;
            next_id = last_id + 1;
            all_updates.extend(updates);
        }
        Ok(all_updates)
    }

    /// All updates on `orgnr`, oldest first
    pub async fn get_unit_update_history(
        &self,
        orgnr: &str,
        latest_only: bool,
        fake_if_not_found: bool,
    ) -> Result<Vec<Value>> {
        let mut updates = self
            .fetch_updates(("organisasjonsnummer", orgnr.to_string()))
            .await?;
        if updates.is_empty() {
            if !fake_if_not_found {
                return Err(IngestError::UnitHasNoUpdates(orgnr.to_string()));
            }
            warn!(%orgnr, "Unit has no updates, faking update");
            updates.push(make_fake_unit_update(orgnr, UNKNOWN_CHANGE, fake_update_date()));
        }
        if latest_only {
            updates.drain(..updates.len() - 1);
        }
        Ok(updates)
    }

    /// Updates on any unit since `last_modified_date` (naive UTC), by orgnr
    pub async fn get_all_updates_since(
        &self,
        last_modified_date: NaiveDateTime,
        latest_only: bool,
    ) -> Result<BTreeMap<String, Vec<Value>>> {
        let updates = self
            .fetch_updates(("dato", naive_utc0_datetime_to_brreg_date_str(last_modified_date)))
            .await?;
        let mut by_orgnr: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for update in updates {
            let Some(orgnr) = update.get("organisasjonsnummer").and_then(Value::as_str) else {
                warn!("Skipping update without organisasjonsnummer");
                continue;
            };
            let entry = by_orgnr.entry(orgnr.to_string()).or_default();
            if latest_only {
                entry.clear();
            }
            entry.push(update);
        }
        info!(units = by_orgnr.len(), since = %last_modified_date, "Fetched BRREG updates");
        Ok(by_orgnr)
    }

    pub fn make_row(&self, update: &Value, fact: Value) -> Result<Row> {
        make_row(update, fact, self.download_date)
    }

    /// Row for one unit from its latest update
    pub async fn get_unit_as_row(
        &self,
        orgnr: &str,
        fake_update_if_not_found: bool,
        fake_unit_if_not_found: bool,
    ) -> Result<Row> {
        let updates = self
            .get_unit_update_history(orgnr, true, fake_update_if_not_found)
            .await?;
        let update = updates
            .first()
            .ok_or_else(|| IngestError::UnitHasNoUpdates(orgnr.to_string()))?;
        let fact = self.get_unit(orgnr, fake_unit_if_not_found).await?;
        self.make_row(update, fact)
    }

    /// Rows for every unit updated since `last_modified_date` (naive UTC)
    pub async fn get_all_units_as_rows_updated_since(
        &self,
        last_modified_date: NaiveDateTime,
        fake_unit_if_not_found: bool,
    ) -> Result<Vec<Row>> {
        let updates = self.get_all_updates_since(last_modified_date, true).await?;
        let mut rows = Vec::with_capacity(updates.len());
        for (orgnr, updates) in &updates {
            let Some(update) = updates.last() else { continue };
            let fact = self.get_unit(orgnr, fake_unit_if_not_found).await?;
            rows.push(self.make_row(update, fact)?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use dwh_common::Value as Cell;
    use serde_json::json;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer, unit_type: UnitType) -> BrregUnitApi {
        let download_date = NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .unwrap();
        BrregUnitApi::new(Client::new(), server.uri(), unit_type, download_date)
    }

    fn update(orgnr: &str, id: i64, change: &str) -> serde_json::Value {
        json!({
            "oppdateringsid": id,
            "dato": "2024-05-30T04:00:00.000Z",
            "organisasjonsnummer": orgnr,
            "endringstype": change
        })
    }

    #[test]
    fn test_accept_header() {
        assert_eq!(
            accept_header("oppdatering.underenhet", "json", 1),
            "application/vnd.brreg.enhetsregisteret.oppdatering.underenhet.v1+json;charset=UTF-8"
        );
    }

    #[tokio::test]
    async fn test_get_unit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/enheter/974760673"))
            .and(header_eq(
                "accept",
                "application/vnd.brreg.enhetsregisteret.enhet.v2+json;charset=UTF-8",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organisasjonsnummer": "974760673", "navn": "REGISTERENHETEN"
            })))
            .mount(&server)
            .await;

        let unit = api(&server, UnitType::Enhet).get_unit("974760673", false).await.unwrap();
        assert_eq!(unit["navn"], "REGISTERENHETEN");
    }

    #[tokio::test]
    async fn test_get_deleted_unit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/underenheter/111111111"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let api = api(&server, UnitType::Underenhet);
        let faked = api.get_unit("111111111", true).await.unwrap();
        assert_eq!(faked, json!({"organisasjonsnummer": "111111111"}));
        let err = api.get_unit("111111111", false).await.unwrap_err();
        assert!(matches!(err, IngestError::UnitNotFound(orgnr) if orgnr == "111111111"));
    }

    #[tokio::test]
    async fn test_update_history_pages_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oppdateringer/enheter"))
            .and(query_param("organisasjonsnummer", "974760673"))
            .and(query_param("oppdateringsid", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_embedded": {"oppdaterteEnheter": [update("974760673", 10, "Ny"), update("974760673", 20, "Endring")]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oppdateringer/enheter"))
            .and(query_param("oppdateringsid", "21"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_embedded": {"oppdaterteEnheter": [update("974760673", 35, "Endring")]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oppdateringer/enheter"))
            .and(query_param("oppdateringsid", "36"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"page": {"totalElements": 0}})))
            .mount(&server)
            .await;

        let api = api(&server, UnitType::Enhet);
        let history = api.get_unit_update_history("974760673", false, false).await.unwrap();
        assert_eq!(history.len(), 3);
        let latest = api.get_unit_update_history("974760673", true, false).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0]["oppdateringsid"], 35);
    }

    #[tokio::test]
    async fn test_update_history_fake_when_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oppdateringer/enheter"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let api = api(&server, UnitType::Enhet);
        let err = api.get_unit_update_history("1", false, false).await.unwrap_err();
        assert!(matches!(err, IngestError::UnitHasNoUpdates(_)));

        let faked = api.get_unit_update_history("1", true, true).await.unwrap();
        assert_eq!(faked[0]["endringstype"], "UKJENT");
        assert_eq!(faked[0]["dato"], "1899-12-31T23:00:00.000Z");
    }

    #[tokio::test]
    async fn test_all_units_updated_since_keeps_latest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oppdateringer/enheter"))
            .and(query_param("dato", "2024-05-29T00:00:00.000Z"))
            .and(query_param("oppdateringsid", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_embedded": {"oppdaterteEnheter": [
                    update("111111111", 1, "Ny"),
                    update("222222222", 2, "Endring"),
                    update("111111111", 3, "Sletting")
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oppdateringer/enheter"))
            .and(query_param("oppdateringsid", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/enheter/111111111"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/enheter/222222222"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"organisasjonsnummer": "222222222"})))
            .mount(&server)
            .await;

        let since = NaiveDate::from_ymd_opt(2024, 5, 29)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let api = api(&server, UnitType::Enhet);

        let all = api.get_all_updates_since(since, false).await.unwrap();
        assert_eq!(all["111111111"].len(), 2);

        let rows = api.get_all_units_as_rows_updated_since(since, true).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("endringstype"), Some(&Cell::Text("Sletting".into())));
        assert_eq!(rows[1].get("organisasjonsnummer"), Some(&Cell::Text("222222222".into())));
    }
}
