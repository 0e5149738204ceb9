//! Conversion of KLASS payloads to warehouse rows

use crate::error::{IngestError, Result};
use crate::ssb::models::{CodeChangeItem, Correspondence, Verbatim, Version};
use chrono::{NaiveDate, NaiveDateTime};
use dwh_common::checksum::string_to_sha256_hash;
use dwh_common::transforms::json_to_string;
use dwh_common::{Row, Value};

fn id_text(id: Option<i64>) -> Value {
    id.map(|id| id.to_string()).into()
}

/// `data` and `sha256_hash` columns for a serializable payload
fn data_columns<T: serde::Serialize>(row: Row, payload: &T) -> Row {
    let data = json_to_string(payload);
    let hash = string_to_sha256_hash(&data);
    row.with("data", data).with("sha256_hash", hash)
}

impl Version {
    /// One row per classification item
    pub fn to_records(&self, api_version: i64, api_name: &str, download_date: NaiveDateTime) -> Result<Vec<Row>> {
        let valid_from = self.valid_from()?;
        let valid_to = self.valid_to()?;
        let last_modified = self.last_modified()?;

        Ok(self
            .classification_items
            .iter()
            .map(|item| {
                let row = Row::new()
                    .with("klassifikasjon_kode", id_text(self.classification_id))
                    .with("versjon_kode", id_text(self.version_id()))
                    .with("gyldig_fom_tid_kilde", valid_from)
                    .with("gyldig_til_tid_kilde", valid_to)
                    .with("oppdatert_tid_kilde", last_modified)
                    .with("api_versjon", api_version);
                data_columns(row, item)
                    .with("lastet_dato", download_date)
                    .with("kildesystem", api_name)
            })
            .collect())
    }

    /// Single row describing the version itself
    pub fn to_metadata_record(&self, api_name: &str, download_date: NaiveDateTime) -> Result<Row> {
        let valid_to = self.valid_to()?;
        Ok(Row::new()
            .with("versjon_kode", id_text(self.version_id()))
            .with("klassifikasjon_kode", id_text(self.classification_id))
            .with("versjon_besk", self.introduction.as_str())
            .with("versjon_navn", self.name.as_str())
            .with("utledet_fra_besk", self.derived_from.clone())
            .with("nivaa_antall", self.levels.len())
            .with("oppdatert_besk", self.latest_change_description().map(str::to_string))
            .with("oppdatert_tid_kilde", self.last_modified()?)
            .with("gyldig_fom_tid_kilde", self.valid_from()?)
            .with("gyldig_til_tid_kilde", valid_to)
            .with("gyldig_flagg_kilde", valid_to.is_none())
            .with("oppdatert_dato", download_date)
            .with("lastet_dato", download_date)
            .with("kildesystem", api_name))
    }
}

impl Correspondence {
    /// One row per correspondence map
    pub fn to_records(&self, api_version: i64, api_name: &str, download_date: NaiveDateTime) -> Result<Vec<Row>> {
        let last_modified = self.last_modified()?;
        Ok(self
            .correspondence_maps
            .iter()
            .map(|map| {
                let row = Row::new()
                    .with("fra_klassifikasjon_kode", id_text(self.source_classification_id))
                    .with("fra_versjon_kode", self.source_id.to_string())
                    .with("til_klassifikasjon_kode", id_text(self.target_classification_id))
                    .with("til_versjon_kode", self.target_id.to_string())
                    .with("oppdatert_tid_kilde", last_modified)
                    .with("api_versjon", api_version);
                data_columns(row, map)
                    .with("lastet_dato", download_date)
                    .with("kildesystem", api_name)
            })
            .collect())
    }
}

impl CodeChangeItem {
    /// Date the change took effect, as midnight
    pub fn change_occurred(&self) -> Result<NaiveDateTime> {
        NaiveDate::parse_from_str(&self.change_occurred, "%Y-%m-%d")
            .map(|date| date.and_time(chrono::NaiveTime::MIN))
            .map_err(|e| IngestError::ssb("change", &self.change_occurred, e))
    }
}

impl Verbatim<CodeChangeItem> {
    /// Row for a change found between `from` and `to` in a classification
    pub fn to_record(
        &self,
        classification_id: i64,
        from: NaiveDate,
        to: Option<NaiveDate>,
        api_name: &str,
        download_date: NaiveDateTime,
    ) -> Row {
        let row = Row::new()
            .with("klassifikasjon_kode", classification_id.to_string())
            .with("fra_dato", from.and_time(chrono::NaiveTime::MIN))
            .with("til_dato", to.map(|to| to.and_time(chrono::NaiveTime::MIN)));
        data_columns(row, self)
            .with("lastet_dato", download_date)
            .with("kildesystem", api_name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn download_date() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap()
    }

    fn version() -> Version {
        let version: Version = serde_json::from_value(json!({
            "name": "Fylkesinndeling 2024",
            "validFrom": "2024-01-01",
            "lastModified": "2024-01-02T10:00:00.000+0000",
            "introduction": "Fylker fra 2024",
            "derivedFrom": "Lov om fylker",
            "levels": [{"levelNumber": 1, "levelName": "Fylke"}],
            "changelogs": [
                {"changeOccured": "2024-01-01", "description": "Ny inndeling"},
                {"changeOccured": "2024-03-01", "description": "Rettet navn"}
            ],
            "classificationItems": [
                {"code": "03", "parentCode": null, "level": "1", "name": "Oslo", "validFrom": "2024-01-01"},
                {"code": "11", "level": "1", "name": "Rogaland", "shortName": "Rog"}
            ],
            "_links": {"self": {"href": "https://data.ssb.no/api/klass/v1/versions/1984"}}
        }))
        .unwrap();
        version.with_classification_id(104)
    }

    #[test]
    fn test_version_records() {
        let rows = version().to_records(1, "SSB", download_date()).unwrap();
        assert_eq!(rows.len(), 2);
        let first = &rows[0];
        assert_eq!(first.get("klassifikasjon_kode"), Some(&Value::Text("104".into())));
        assert_eq!(first.get("versjon_kode"), Some(&Value::Text("1984".into())));
        assert_eq!(first.get("gyldig_til_tid_kilde"), Some(&Value::Null));
        assert_eq!(
            first.get("data").and_then(Value::as_str),
            Some(r#"{"code": "03", "parentCode": null, "level": "1", "name": "Oslo", "validFrom": "2024-01-01"}"#)
        );
        let data = first.get("data").and_then(Value::as_str).unwrap();
        assert_eq!(
            first.get("sha256_hash").and_then(Value::as_str),
            Some(string_to_sha256_hash(data).as_str())
        );
        assert_eq!(
            first.columns().collect::<Vec<_>>(),
            [
                "klassifikasjon_kode",
                "versjon_kode",
                "gyldig_fom_tid_kilde",
                "gyldig_til_tid_kilde",
                "oppdatert_tid_kilde",
                "api_versjon",
                "data",
                "sha256_hash",
                "lastet_dato",
                "kildesystem"
            ]
        );
    }

    #[test]
    fn test_metadata_record_uses_last_changelog() {
        let row = version().to_metadata_record("SSB", download_date()).unwrap();
        assert_eq!(row.get("oppdatert_besk"), Some(&Value::Text("Rettet navn".into())));
        assert_eq!(row.get("nivaa_antall"), Some(&Value::Int(1)));
        assert_eq!(row.get("gyldig_flagg_kilde"), Some(&Value::Bool(true)));
        assert_eq!(row.get("utledet_fra_besk"), Some(&Value::Text("Lov om fylker".into())));
        assert_eq!(
            row.columns().collect::<Vec<_>>(),
            [
                "versjon_kode",
                "klassifikasjon_kode",
                "versjon_besk",
                "versjon_navn",
                "utledet_fra_besk",
                "nivaa_antall",
                "oppdatert_besk",
                "oppdatert_tid_kilde",
                "gyldig_fom_tid_kilde",
                "gyldig_til_tid_kilde",
                "gyldig_flagg_kilde",
                "oppdatert_dato",
                "lastet_dato",
                "kildesystem"
            ]
        );
    }

    #[test]
    fn test_metadata_record_without_changelog() {
        let mut version = version();
        version.changelogs.clear();
        version.valid_to = Some("2024-12-31".into());
        let row = version.to_metadata_record("SSB", download_date()).unwrap();
        assert_eq!(row.get("oppdatert_besk"), Some(&Value::Null));
        assert_eq!(row.get("gyldig_flagg_kilde"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_correspondence_records() {
        let mut correspondence: Correspondence = serde_json::from_value(json!({
            "name": "Fylke 2023 - Fylke 2024",
            "source": "Fylkesinndeling 2023",
            "sourceId": 1500,
            "target": "Fylkesinndeling 2024",
            "targetId": 1984,
            "lastModified": "2024-01-02T10:00:00.000+0000",
            "correspondenceMaps": [
                {"sourceCode": "30", "sourceName": "Viken", "targetCode": "31", "targetName": "Østfold"}
            ]
        }))
        .unwrap();
        correspondence.source_classification_id = Some(104);
        correspondence.target_classification_id = Some(104);

        let rows = correspondence.to_records(1, "SSB", download_date()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("fra_versjon_kode"), Some(&Value::Text("1500".into())));
        assert_eq!(rows[0].get("til_klassifikasjon_kode"), Some(&Value::Text("104".into())));
    }

    #[test]
    fn test_code_change_record() {
        let raw = json!({
            "oldCode": "30", "oldName": "Viken", "oldShortName": null,
            "newCode": "31", "newName": "Østfold", "newShortName": null,
            "changeOccurred": "2024-01-01"
        });
        let change: Verbatim<CodeChangeItem> = serde_json::from_value(raw.clone()).unwrap();
        let from = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let row = change.to_record(104, from, None, "SSB", download_date());
        assert_eq!(row.get("klassifikasjon_kode"), Some(&Value::Text("104".into())));
        assert_eq!(row.get("til_dato"), Some(&Value::Null));
        assert_eq!(row.get("data").and_then(Value::as_str), Some(json_to_string(&raw).as_str()));
        assert_eq!(
            row.columns().collect::<Vec<_>>(),
            [
                "klassifikasjon_kode",
                "fra_dato",
                "til_dato",
                "data",
                "sha256_hash",
                "lastet_dato",
                "kildesystem"
            ]
        );
        assert_eq!(change.change_occurred().unwrap().to_string(), "2024-01-01 00:00:00");
    }

    #[test]
    fn test_correspondence_data_keeps_unknown_keys() {
        let map = json!({
            "sourceCode": "30", "sourceName": "Viken", "sourceShortName": null,
            "targetCode": "31", "targetName": "Østfold", "targetShortName": null
        });
        let mut correspondence: Correspondence = serde_json::from_value(json!({
            "name": "Fylke 2023 - Fylke 2024",
            "source": "Fylkesinndeling 2023",
            "sourceId": 1500,
            "target": "Fylkesinndeling 2024",
            "targetId": 1984,
            "lastModified": "2024-01-02T10:00:00.000+0000",
            "correspondenceMaps": [map.clone()]
        }))
        .unwrap();
        correspondence.source_classification_id = Some(104);
        correspondence.target_classification_id = Some(104);

        let rows = correspondence.to_records(1, "SSB", download_date()).unwrap();
        let data = json_to_string(&map);
        assert_eq!(rows[0].get("data").and_then(Value::as_str), Some(data.as_str()));
        assert_eq!(
            rows[0].get("sha256_hash").and_then(Value::as_str),
            Some(string_to_sha256_hash(&data).as_str())
        );
    }
}
