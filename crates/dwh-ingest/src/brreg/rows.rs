//! Unit documents to rows

use crate::brreg::{API_NAME, API_VERSION};
use crate::error::{IngestError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use dwh_common::checksum::string_to_sha256_hash;
use dwh_common::transforms::{json_to_string, string_to_naive_norwegian_datetime};
use dwh_common::Row;
use serde_json::{json, Map, Value};

/// Change type used when a unit has no update history
pub const UNKNOWN_CHANGE: &str = "UKJENT";

/// Change type used for units loaded from the bulk file
pub const FILE_CHANGE: &str = "FLATFIL";

/// UTC instant that becomes 1900-01-01 00:00 in Norwegian time
pub fn fake_update_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 0, 0))
        .unwrap_or_default()
}

/// `2024-01-02T03:04:05.678Z` style date for BRREG query parameters
pub fn naive_utc0_datetime_to_brreg_date_str(date: NaiveDateTime) -> String {
    date.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// BRREG dates are UTC with a `Z` suffix
pub fn brreg_date_to_naive_norwegian_datetime(date: Option<&str>) -> Result<Option<NaiveDateTime>> {
    date.map(|date| string_to_naive_norwegian_datetime(date).map_err(IngestError::from))
        .transpose()
}

pub fn make_fake_unit(orgnr: &str) -> Value {
    json!({ "organisasjonsnummer": orgnr })
}

pub fn make_fake_unit_update(orgnr: &str, change: &str, last_modified_date: NaiveDateTime) -> Value {
    json!({
        "organisasjonsnummer": orgnr,
        "endringstype": change,
        "dato": naive_utc0_datetime_to_brreg_date_str(last_modified_date),
    })
}

fn strip_links(object: &mut Map<String, Value>) {
    object.remove("_links");
    object.remove("links");
}

fn required_str<'a>(update: &'a Value, key: &str) -> Result<&'a str> {
    update
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| IngestError::Deserialization(format!("BRREG update is missing '{key}'")))
}

/// Combines an update document with the unit document into a row
///
/// Links are removed from the unit (and its `organisasjonsform`) before it is
/// serialized into `data`.
pub fn make_row(update: &Value, mut fact: Value, download_date: NaiveDateTime) -> Result<Row> {
    if let Some(object) = fact.as_object_mut() {
        strip_links(object);
        if let Some(form) = object.get_mut("organisasjonsform").and_then(Value::as_object_mut) {
            strip_links(form);
        }
    }
    let data = json_to_string(&fact);
    let hash = string_to_sha256_hash(&data);
    let updated = brreg_date_to_naive_norwegian_datetime(update.get("dato").and_then(Value::as_str))?;

    Ok(Row::new()
        .with("organisasjonsnummer", required_str(update, "organisasjonsnummer")?)
        .with("endringstype", required_str(update, "endringstype")?)
        .with("oppdatert_tid_kilde", updated)
        .with("api_versjon", API_VERSION)
        .with("data", data)
        .with("sha256_hash", hash)
        .with("lastet_dato", download_date)
        .with("kildesystem", API_NAME))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dwh_common::Value as Cell;

    fn download_date() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .unwrap()
    }

    #[test]
    fn test_brreg_date_format() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_milli_opt(3, 4, 5, 678))
            .unwrap();
        assert_eq!(naive_utc0_datetime_to_brreg_date_str(date), "2024-01-02T03:04:05.678Z");
        assert_eq!(
            naive_utc0_datetime_to_brreg_date_str(fake_update_date()),
            "1899-12-31T23:00:00.000Z"
        );
    }

    #[test]
    fn test_brreg_date_to_norwegian() {
        let converted = brreg_date_to_naive_norwegian_datetime(Some("2024-07-01T10:00:00.000Z")).unwrap();
        assert_eq!(converted.unwrap().to_string(), "2024-07-01 12:00:00");
        assert_eq!(brreg_date_to_naive_norwegian_datetime(None).unwrap(), None);
    }

    #[test]
    fn test_make_row_strips_links() {
        let update = make_fake_unit_update("123456789", UNKNOWN_CHANGE, fake_update_date());
        let fact = json!({
            "organisasjonsnummer": "123456789",
            "navn": "Testbedrift AS",
            "organisasjonsform": {"kode": "AS", "_links": {"self": {"href": "x"}}},
            "_links": {"self": {"href": "y"}}
        });
        let row = make_row(&update, fact, download_date()).unwrap();
        assert_eq!(
            row.get("data").and_then(Cell::as_str),
            Some(r#"{"organisasjonsnummer": "123456789", "navn": "Testbedrift AS", "organisasjonsform": {"kode": "AS"}}"#)
        );
        assert_eq!(row.get("endringstype"), Some(&Cell::Text("UKJENT".into())));
        assert_eq!(
            row.get("oppdatert_tid_kilde").and_then(Cell::as_timestamp).map(|t| t.to_string()),
            Some("1900-01-01 00:00:00".to_string())
        );
        assert_eq!(row.get("api_versjon"), Some(&Cell::Int(2)));
        assert_eq!(row.get("kildesystem"), Some(&Cell::Text("BRREG".into())));
    }

    #[test]
    fn test_make_row_requires_change_type() {
        let update = json!({"organisasjonsnummer": "1", "dato": "2024-01-01T00:00:00.000Z"});
        assert!(make_row(&update, make_fake_unit("1"), download_date()).is_err());
    }
}
