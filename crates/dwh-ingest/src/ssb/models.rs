//! KLASS API payloads
//!
//! Field names follow the API (camelCase). Links are kept because some
//! payloads only carry their own id in `_links.self.href`.

use crate::error::{IngestError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use dwh_common::transforms::string_to_naive_norwegian_datetime;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::ops::Deref;

const VALID_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

/// `_links` object, keyed by relation (`self`, `source`, `target`, ...)
pub type Links = BTreeMap<String, Link>;

/// Trailing numeric segment of the link with relation `rel`
pub fn id_from_link(links: &Links, rel: &str) -> Option<i64> {
    let href = &links.get(rel)?.href;
    let segment = href.trim_end_matches('/').rsplit('/').next()?;
    // links may carry a query string, e.g. `.../versions/33?language=nb`
    segment.split('?').next()?.parse().ok()
}

fn parse_valid_date(field: &str, value: &str) -> Result<NaiveDateTime> {
    NaiveDate::parse_from_str(value, VALID_DATE_FORMAT)
        .map(|date| date.and_time(chrono::NaiveTime::MIN))
        .map_err(|e| IngestError::ssb("date", value, format!("{field}: {e}")))
}

fn parse_last_modified(value: &str) -> Result<NaiveDateTime> {
    Ok(string_to_naive_norwegian_datetime(value)?)
}

/// Typed view of a payload together with the JSON exactly as received
///
/// Serializes back to the received JSON, so the `data` column and its hash
/// keep every key KLASS sends, `null`s included.
#[derive(Debug, Clone, PartialEq)]
pub struct Verbatim<T> {
    fields: T,
    raw: serde_json::Value,
}

impl<T> Verbatim<T> {
    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }
}

impl<T> Deref for Verbatim<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.fields
    }
}

impl<T> Serialize for Verbatim<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Verbatim<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let fields = T::deserialize(&raw).map_err(D::Error::custom)?;
        Ok(Self { fields, raw })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPerson {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub level_number: i64,
    pub level_name: String,
}

/// Entry in a changelog; the API spells it `changeOccured`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changelog {
    pub change_occured: String,
    pub description: String,
}

/// A code in a classification version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationItem {
    pub code: String,
    #[serde(default)]
    pub parent_code: Option<String>,
    pub level: serde_json::Value,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHeader {
    pub name: String,
    #[serde(default, alias = "ID")]
    pub id: Option<i64>,
    pub valid_from: String,
    #[serde(default)]
    pub valid_to: Option<String>,
    pub last_modified: String,
    #[serde(default)]
    pub published: Vec<String>,
    #[serde(rename = "_links", default)]
    pub links: Links,
}

impl VersionHeader {
    pub fn version_id(&self) -> Option<i64> {
        self.id.or_else(|| id_from_link(&self.links, "self"))
    }

    pub fn valid_from(&self) -> Result<NaiveDateTime> {
        parse_valid_date("validFrom", &self.valid_from)
    }

    pub fn valid_to(&self) -> Result<Option<NaiveDateTime>> {
        self.valid_to.as_deref().map(|to| parse_valid_date("validTo", to)).transpose()
    }

    pub fn last_modified(&self) -> Result<NaiveDateTime> {
        parse_last_modified(&self.last_modified)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrespondenceTableHeader {
    pub name: String,
    #[serde(default, alias = "ID")]
    pub id: Option<i64>,
    #[serde(default)]
    pub owning_section: Option<String>,
    pub source: String,
    pub source_id: i64,
    pub target: String,
    pub target_id: i64,
    #[serde(default)]
    pub change_table: bool,
    #[serde(default)]
    pub published: Vec<String>,
    #[serde(default)]
    pub source_level: Option<Level>,
    #[serde(default)]
    pub target_level: Option<Level>,
    pub last_modified: String,
    #[serde(rename = "_links", default)]
    pub links: Links,
}

impl CorrespondenceTableHeader {
    pub fn correspondence_id(&self) -> Option<i64> {
        self.id.or_else(|| id_from_link(&self.links, "self"))
    }
}

/// Pair of corresponding codes in a correspondence table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrespondenceMap {
    pub source_code: String,
    pub source_name: String,
    pub target_code: String,
    pub target_name: String,
}

/// `/classifications/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub name: String,
    #[serde(default, alias = "ID")]
    pub id: Option<i64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub primary_language: Option<String>,
    #[serde(default)]
    pub classification_type: Option<String>,
    #[serde(default)]
    pub include_short_name: bool,
    #[serde(default)]
    pub include_notes: bool,
    #[serde(default)]
    pub contact_person: Option<ContactPerson>,
    #[serde(default)]
    pub owning_section: Option<String>,
    #[serde(default)]
    pub statistical_units: Vec<String>,
    pub last_modified: String,
    #[serde(default)]
    pub versions: Vec<VersionHeader>,
    #[serde(rename = "_links", default)]
    pub links: Links,
}

impl Classification {
    pub fn classification_id(&self) -> Option<i64> {
        self.id.or_else(|| id_from_link(&self.links, "self"))
    }

    pub fn last_modified(&self) -> Result<NaiveDateTime> {
        parse_last_modified(&self.last_modified)
    }
}

/// `/versions/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub name: String,
    #[serde(default, alias = "ID")]
    pub id: Option<i64>,
    pub valid_from: String,
    #[serde(default)]
    pub valid_to: Option<String>,
    pub last_modified: String,
    #[serde(default)]
    pub published: Vec<String>,
    #[serde(default)]
    pub introduction: String,
    #[serde(default)]
    pub contact_person: Option<ContactPerson>,
    #[serde(default)]
    pub owning_section: Option<String>,
    #[serde(default)]
    pub legal_base: Option<String>,
    #[serde(default)]
    pub publications: Option<String>,
    #[serde(default)]
    pub derived_from: Option<String>,
    #[serde(default)]
    pub correspondence_tables: Vec<CorrespondenceTableHeader>,
    #[serde(default)]
    pub classification_variants: Vec<serde_json::Value>,
    #[serde(default)]
    pub changelogs: Vec<Changelog>,
    #[serde(default)]
    pub levels: Vec<Level>,
    #[serde(default)]
    pub classification_items: Vec<Verbatim<ClassificationItem>>,
    #[serde(rename = "_links", default)]
    pub links: Links,
    /// Classification implemented by this version
    #[serde(skip)]
    pub classification_id: Option<i64>,
}

impl Version {
    pub fn version_id(&self) -> Option<i64> {
        self.id.or_else(|| id_from_link(&self.links, "self"))
    }

    /// Sets the classification this version belongs to
    pub fn with_classification_id(mut self, classification_id: i64) -> Self {
        self.classification_id = Some(classification_id);
        self
    }

    pub fn valid_from(&self) -> Result<NaiveDateTime> {
        parse_valid_date("validFrom", &self.valid_from)
    }

    pub fn valid_to(&self) -> Result<Option<NaiveDateTime>> {
        self.valid_to.as_deref().map(|to| parse_valid_date("validTo", to)).transpose()
    }

    pub fn last_modified(&self) -> Result<NaiveDateTime> {
        parse_last_modified(&self.last_modified)
    }

    /// Description of the most recent changelog entry
    pub fn latest_change_description(&self) -> Option<&str> {
        self.changelogs.last().map(|c| c.description.as_str())
    }
}

/// `/correspondencetables/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correspondence {
    pub name: String,
    #[serde(default, alias = "ID")]
    pub id: Option<i64>,
    #[serde(default)]
    pub owning_section: Option<String>,
    pub source: String,
    pub source_id: i64,
    pub target: String,
    pub target_id: i64,
    #[serde(default)]
    pub change_table: bool,
    pub last_modified: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub changelogs: Vec<Changelog>,
    #[serde(default)]
    pub correspondence_maps: Vec<Verbatim<CorrespondenceMap>>,
    #[serde(rename = "_links", default)]
    pub links: Links,
    #[serde(skip)]
    pub source_classification_id: Option<i64>,
    #[serde(skip)]
    pub target_classification_id: Option<i64>,
}

impl Correspondence {
    pub fn last_modified(&self) -> Result<NaiveDateTime> {
        parse_last_modified(&self.last_modified)
    }
}

/// A code changed between two versions of a classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChangeItem {
    #[serde(default)]
    pub old_code: Option<String>,
    #[serde(default)]
    pub old_name: Option<String>,
    #[serde(default)]
    pub old_short_name: Option<String>,
    #[serde(default)]
    pub new_code: Option<String>,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub new_short_name: Option<String>,
    pub change_occurred: String,
}

/// Body of `/classifications/{id}/changes`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CodeChanges {
    #[serde(default)]
    pub code_changes: Vec<Verbatim<CodeChangeItem>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_from_link() {
        let links: Links = serde_json::from_value(json!({
            "self": {"href": "https://data.ssb.no/api/klass/v1/versions/1954"},
            "classification": {"href": "https://data.ssb.no/api/klass/v1/classifications/36?language=nb"}
        }))
        .unwrap();
        assert_eq!(id_from_link(&links, "self"), Some(1954));
        assert_eq!(id_from_link(&links, "classification"), Some(36));
        assert_eq!(id_from_link(&links, "missing"), None);
    }

    #[test]
    fn test_version_header_dates() {
        let header: VersionHeader = serde_json::from_value(json!({
            "name": "Kommuneinndeling 2024",
            "validFrom": "2024-01-01",
            "lastModified": "2023-12-18T11:13:39.443+0000",
            "published": ["nb"],
            "_links": {"self": {"href": "https://data.ssb.no/api/klass/v1/versions/1954"}}
        }))
        .unwrap();
        assert_eq!(header.version_id(), Some(1954));
        assert_eq!(header.valid_from().unwrap().to_string(), "2024-01-01 00:00:00");
        assert_eq!(header.valid_to().unwrap(), None);
        assert_eq!(header.last_modified().unwrap().to_string(), "2023-12-18 12:13:39.443");
    }

    #[test]
    fn test_invalid_valid_date_is_an_error() {
        assert!(parse_valid_date("validFrom", "01.01.2024").is_err());
    }

    #[test]
    fn test_item_serializes_as_received() {
        let raw = json!({
            "code": "03", "parentCode": null, "level": "1", "name": "Oslo",
            "validFrom": null, "validTo": null
        });
        let item: Verbatim<ClassificationItem> = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.code, "03");
        assert_eq!(item.parent_code, None);
        assert_eq!(item.raw(), &raw);
        assert_eq!(
            dwh_common::transforms::json_to_string(&item),
            r#"{"code": "03", "parentCode": null, "level": "1", "name": "Oslo", "validFrom": null, "validTo": null}"#
        );
    }

    #[test]
    fn test_item_missing_required_field_is_an_error() {
        let item = serde_json::from_value::<Verbatim<ClassificationItem>>(json!({"code": "03"}));
        assert!(item.is_err());
    }
}
