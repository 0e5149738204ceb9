//! Row model shared by the loaders
//!
//! A [`Row`] is an ordered list of column/value pairs. Column order is kept
//! because insert statements are built from the columns of the first row in
//! a batch.

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};

/// A single database value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Bind size in the sense of the database driver: string length in
    /// bytes, zero for fixed-size types.
    pub fn bind_size(&self) -> usize {
        match self {
            Value::Text(s) => s.len(),
            _ => 0,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Convert into a JSON value; timestamps use ISO 8601 without offset
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Ordered column/value record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; replaces an existing column in place
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_json(self) -> serde_json::Value {
        let map = self
            .fields
            .into_iter()
            .map(|(c, v)| (c, v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_row_keeps_insertion_order() {
        let row = Row::new().with("b", 1).with("a", "x").with("c", Value::Null);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_row_set_replaces_existing_column() {
        let row = Row::new().with("a", 1).with("b", 2).with("a", 3);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("a"), Some(&Value::Int(3)));
        assert_eq!(row.columns().next(), Some("a"));
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<String> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(5i64)), Value::Int(5));
    }

    #[test]
    fn test_row_to_json() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let row = Row::new().with("n", 1).with("t", ts).with("s", Value::Null);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"n":1,"t":"2024-01-02T03:04:05","s":null}"#);
    }

    #[test]
    fn test_bind_size() {
        assert_eq!(Value::from("abc").bind_size(), 3);
        assert_eq!(Value::from(12).bind_size(), 0);
        assert_eq!(Value::from("ø").bind_size(), 2);
    }
}
