//! Tagged values and ordered records
//!
//! Every row read from or written to the database travels as a [`Record`]:
//! an ordered list of field name to [`Value`] pairs. Field order is kept so
//! that generated statements and logs are stable.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

/// A semantically typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Short name of the variant, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
            Value::Binary(_) => "binary",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Convert to JSON. Timestamps become RFC 3339 strings and binary becomes hex.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::Int(i) => JsonValue::Number(Number::from(*i)),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Timestamp(ts) => JsonValue::String(format_timestamp(ts)),
            Value::Binary(bytes) => JsonValue::String(hex::encode(bytes)),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                let mut obj = JsonMap::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_json());
                }
                JsonValue::Object(obj)
            }
        }
    }

    /// Convert from JSON without type hints. Strings stay strings.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(obj) => Value::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Canonical text form for timestamps: RFC 3339 with millisecond precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Timestamp(ts) => f.write_str(&format_timestamp(ts)),
            Value::Binary(bytes) => f.write_str(&hex::encode(bytes)),
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Binary(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// Ordered field name to value mapping used for rows and bind parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Insert or replace a value, keeping the original position on replace.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v)
    }

    /// A value that is present and not null.
    pub fn get_present(&self, field: &str) -> Option<&Value> {
        self.get(field).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    pub fn get_timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field).and_then(Value::as_timestamp)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == field)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` into this record, except the fields in `skip`.
    pub fn merge_from(&mut self, other: &Record, skip: &[&str]) {
        for (k, v) in other.iter() {
            if !skip.contains(&k) {
                self.set(k, v.clone());
            }
        }
    }

    /// Copy entries of `other` only where this record has no value yet.
    pub fn merge_missing(&mut self, other: &Record) {
        for (k, v) in other.iter() {
            if !self.contains_key(k) {
                self.set(k, v.clone());
            }
        }
    }

    /// Project the record onto a list of fields, in the given order.
    pub fn project(&self, fields: &[String]) -> Record {
        let mut out = Record::new();
        for f in fields {
            if let Some(v) = self.get(f) {
                out.set(f.clone(), v.clone());
            }
        }
        out
    }

    pub fn to_json(&self) -> JsonValue {
        let mut obj = JsonMap::new();
        for (k, v) in &self.entries {
            obj.insert(k.clone(), v.to_json());
        }
        JsonValue::Object(obj)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_set_keeps_position() {
        let mut rec = Record::new().with("a", 1).with("b", "x");
        rec.set("a", 2);
        let keys: Vec<&str> = rec.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(rec.get_i64("a"), Some(2));
    }

    #[test]
    fn test_merge_from_skips_fields() {
        let mut working = Record::new().with("userId", 7).with("touchedDate", "keep");
        let row = Record::new()
            .with("userId", 7)
            .with("name", "ada")
            .with("touchedDate", "drop");
        working.merge_from(&row, &["touchedDate"]);
        assert_eq!(working.get_str("name"), Some("ada"));
        assert_eq!(working.get_str("touchedDate"), Some("keep"));
    }

    #[test]
    fn test_merge_missing_does_not_overwrite() {
        let mut rec = Record::new().with("count", 5);
        rec.merge_missing(&Record::new().with("count", 0).with("enabled", true));
        assert_eq!(rec.get_i64("count"), Some(5));
        assert_eq!(rec.get_bool("enabled"), Some(true));
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
    }

    #[test]
    fn test_timestamp_json_is_rfc3339_millis() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let json = Value::Timestamp(ts).to_json();
        assert_eq!(json, JsonValue::String("2024-03-01T12:30:00.000Z".to_string()));
    }

    #[test]
    fn test_from_json_nested() {
        let json = serde_json::json!({"a": [1, "two", true], "b": {"c": 1.5}});
        let value = Value::from_json(&json);
        let map = value.as_map().expect("object should become a map");
        assert_eq!(
            map.get("a"),
            Some(&Value::List(vec![
                Value::Int(1),
                Value::Str("two".to_string()),
                Value::Bool(true)
            ]))
        );
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_remove_and_project() {
        let mut rec = Record::new().with("a", 1).with("b", 2).with("c", 3);
        assert_eq!(rec.remove("b"), Some(Value::Int(2)));
        let projected = rec.project(&["c".to_string(), "a".to_string(), "zz".to_string()]);
        let keys: Vec<&str> = projected.keys().collect();
        assert_eq!(keys, vec!["c", "a"]);
    }
}
