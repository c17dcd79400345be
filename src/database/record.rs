//! Caller-supplied records and primary-key values

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::Serialize;

use crate::error::{Result, StoreError};

/// A primary-key value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum RecordKey {
    Integer(i64),
    Text(String),
}

impl RecordKey {
    /// Interpret a field value as a key
    ///
    /// NULL means "no key"; REAL and BLOB values cannot be keys.
    pub fn from_value(value: &Value) -> Result<Option<RecordKey>> {
        match value {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(RecordKey::Integer(*i))),
            Value::Text(s) => Ok(Some(RecordKey::Text(s.clone()))),
            Value::Real(_) | Value::Blob(_) => Err(StoreError::config(
                "primary key values must be integers or text",
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Integer(i) => Value::Integer(*i),
            RecordKey::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Integer(i) => write!(f, "{}", i),
            RecordKey::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        RecordKey::Integer(value)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey::Text(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        RecordKey::Text(value)
    }
}

impl ToSql for RecordKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            RecordKey::Integer(i) => Ok(ToSqlOutput::from(*i)),
            RecordKey::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}

impl FromSql for RecordKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(RecordKey::Integer(i)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| RecordKey::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// A mapping of column name to value
///
/// Fields are kept in name order, so the SQL generated from a record is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// The record's key, if the key field is present and not NULL
    pub fn key(&self, key_field: &str) -> Result<Option<RecordKey>> {
        match self.fields.get(key_field) {
            Some(value) => RecordKey::from_value(value),
            None => Ok(None),
        }
    }

    /// Build a record from a JSON object
    ///
    /// Booleans become integers; arrays and objects are stored as JSON text.
    pub fn from_json(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        object
            .iter()
            .map(|(field, value)| (field.clone(), json_to_value(value)))
            .collect()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_extraction() {
        let record = Record::new().with("id", 7i64).with("name", "ada".to_string());
        assert_eq!(record.key("id").unwrap(), Some(RecordKey::Integer(7)));
        assert_eq!(record.key("missing").unwrap(), None);

        let null_key = Record::new().with("id", Value::Null);
        assert_eq!(null_key.key("id").unwrap(), None);

        let bad_key = Record::new().with("id", 1.5f64);
        assert!(bad_key.key("id").unwrap_err().is_configuration());
    }

    #[test]
    fn test_fields_are_name_ordered() {
        let record = Record::new()
            .with("zeta", 1i64)
            .with("alpha", 2i64)
            .with("mid", 3i64);
        let names: Vec<&str> = record.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({
            "id": 3,
            "name": "Mario",
            "score": 1.5,
            "active": true,
            "tags": ["a", "b"],
            "note": null
        });
        let record = Record::from_json(json.as_object().unwrap());

        assert_eq!(record.get("id"), Some(&Value::Integer(3)));
        assert_eq!(record.get("name"), Some(&Value::Text("Mario".to_string())));
        assert_eq!(record.get("score"), Some(&Value::Real(1.5)));
        assert_eq!(record.get("active"), Some(&Value::Integer(1)));
        assert_eq!(
            record.get("tags"),
            Some(&Value::Text("[\"a\",\"b\"]".to_string()))
        );
        assert_eq!(record.get("note"), Some(&Value::Null));
    }

    #[test]
    fn test_key_sql_round_trip() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let key: RecordKey = conn
            .query_row("SELECT ?1", [RecordKey::from("abc")], |row| row.get(0))
            .unwrap();
        assert_eq!(key, RecordKey::Text("abc".to_string()));
        assert_eq!(RecordKey::Integer(4).to_string(), "4");
    }
}
