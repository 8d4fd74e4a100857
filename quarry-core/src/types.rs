//! Type mapper: semantic field types to native column types and encodings
//!
//! Every value crosses the driver boundary as a [`SqlValue`]. The mapping in
//! both directions is driven by the field descriptor, so a driver only has
//! to move a handful of primitive encodings.
//!
//! Lists are stored in `varchar` columns. When the elements can never
//! contain a comma (declared `no_commas`, or boolean/numeric/timestamp
//! elements) they are comma-joined; otherwise they are encoded as a JSON
//! array.

use crate::dialect::DialectOptions;
use crate::error::ConversionError;
use crate::schema::{FieldDef, FieldType};
use crate::value::{format_timestamp, Value};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Primitive encodings understood by every driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    fn describe(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Text(_) => "text",
            SqlValue::Int(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Bool(_) => "boolean",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Bytes(_) => "bytes",
        }
    }
}

// ============================================================================
// COLUMN TYPES
// ============================================================================

/// Native column type for a field.
pub fn column_type(field: &FieldDef, dialect: &DialectOptions) -> String {
    if field.is_list {
        return "varchar".to_string();
    }
    let ty = match field.field_type {
        FieldType::String | FieldType::Map => "varchar",
        FieldType::Integer if field.auto_increment => dialect.auto_increment_type(),
        FieldType::Integer => "bigint",
        FieldType::Float => "float",
        FieldType::Timestamp => dialect.timestamp_type(),
        FieldType::Boolean => "boolean",
        FieldType::Binary => dialect.binary_type(),
    };
    ty.to_string()
}

/// Whether list values of this field are comma-joined rather than JSON encoded.
pub fn uses_separator(field: &FieldDef) -> bool {
    field.no_commas
        || matches!(
            field.field_type,
            FieldType::Boolean | FieldType::Integer | FieldType::Float | FieldType::Timestamp
        )
}

// ============================================================================
// SEMANTIC -> NATIVE
// ============================================================================

/// Encode a value for binding against a column of `field`.
pub fn to_sql_value(field: &FieldDef, value: &Value) -> Result<SqlValue, ConversionError> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    if field.is_list {
        let items = match value {
            Value::List(items) => items.as_slice(),
            other => std::slice::from_ref(other),
        };
        return encode_list(field, items).map(SqlValue::Text);
    }
    encode_scalar(field, value)
}

fn encode_scalar(field: &FieldDef, value: &Value) -> Result<SqlValue, ConversionError> {
    let mismatch = || ConversionError::Unsupported {
        field: field.name.clone(),
        expected: field.field_type.as_str().to_string(),
        got: value.type_name().to_string(),
    };
    match field.field_type {
        FieldType::String => match value {
            Value::Str(s) => Ok(SqlValue::Text(s.clone())),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Timestamp(_) => {
                Ok(SqlValue::Text(value.to_string()))
            }
            _ => Err(mismatch()),
        },
        FieldType::Integer => match value {
            Value::Int(i) => Ok(SqlValue::Int(*i)),
            Value::Float(f) if f.fract() == 0.0 => Ok(SqlValue::Int(*f as i64)),
            Value::Str(s) => s.trim().parse().map(SqlValue::Int).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldType::Float => match value {
            Value::Float(f) => Ok(SqlValue::Real(*f)),
            Value::Int(i) => Ok(SqlValue::Real(*i as f64)),
            Value::Str(s) => s.trim().parse().map(SqlValue::Real).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldType::Timestamp => match value {
            Value::Timestamp(ts) => Ok(SqlValue::Timestamp(*ts)),
            Value::Str(s) => parse_timestamp(&field.name, s).map(SqlValue::Timestamp),
            _ => Err(mismatch()),
        },
        FieldType::Boolean => match value {
            Value::Bool(b) => Ok(SqlValue::Bool(*b)),
            Value::Str(s) => parse_bool(&field.name, s).map(SqlValue::Bool),
            _ => Err(mismatch()),
        },
        FieldType::Binary => match value {
            Value::Binary(bytes) => Ok(SqlValue::Bytes(bytes.clone())),
            _ => Err(mismatch()),
        },
        FieldType::Map => match value {
            Value::Map(_) | Value::List(_) => Ok(SqlValue::Text(value.to_json().to_string())),
            Value::Str(s) => Ok(SqlValue::Text(s.clone())),
            _ => Err(mismatch()),
        },
    }
}

/// Encode list elements according to the separator policy.
pub fn encode_list(field: &FieldDef, items: &[Value]) -> Result<String, ConversionError> {
    if uses_separator(field) {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            let part = match item {
                Value::Timestamp(ts) => format_timestamp(ts),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if part.contains(',') {
                return Err(ConversionError::Malformed {
                    field: field.name.clone(),
                    reason: format!("list element {:?} contains a comma", part),
                });
            }
            parts.push(part);
        }
        Ok(parts.join(","))
    } else {
        let json = JsonValue::Array(items.iter().map(Value::to_json).collect());
        Ok(json.to_string())
    }
}

/// Decode list text according to the separator policy.
pub fn decode_list(field: &FieldDef, text: &str) -> Result<Vec<Value>, ConversionError> {
    if uses_separator(field) {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        text.split(',')
            .map(|part| parse_text_scalar(field, part))
            .collect()
    } else {
        let json: JsonValue =
            serde_json::from_str(text).map_err(|e| ConversionError::Malformed {
                field: field.name.clone(),
                reason: e.to_string(),
            })?;
        match json {
            JsonValue::Array(items) => items.iter().map(|j| json_scalar(field, j)).collect(),
            other => Err(ConversionError::Malformed {
                field: field.name.clone(),
                reason: format!("expected a JSON array, got {}", other),
            }),
        }
    }
}

// ============================================================================
// NATIVE -> SEMANTIC
// ============================================================================

/// Decode a driver value read from a column of `field`.
pub fn from_sql_value(field: &FieldDef, raw: SqlValue) -> Result<Value, ConversionError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    if field.is_list {
        return match raw {
            SqlValue::Text(text) => decode_list(field, &text).map(Value::List),
            other => Err(unexpected(field, &other)),
        };
    }
    match (field.field_type, raw) {
        (FieldType::String, SqlValue::Text(s)) => Ok(Value::Str(s)),
        (FieldType::String, SqlValue::Int(i)) => Ok(Value::Str(i.to_string())),
        (FieldType::Integer, SqlValue::Int(i)) => Ok(Value::Int(i)),
        (FieldType::Integer, SqlValue::Real(f)) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
        (FieldType::Float, SqlValue::Real(f)) => Ok(Value::Float(f)),
        (FieldType::Float, SqlValue::Int(i)) => Ok(Value::Float(i as f64)),
        (FieldType::Boolean, SqlValue::Bool(b)) => Ok(Value::Bool(b)),
        (FieldType::Boolean, SqlValue::Int(i)) => Ok(Value::Bool(i != 0)),
        (FieldType::Boolean, SqlValue::Text(s)) => parse_bool(&field.name, &s).map(Value::Bool),
        (FieldType::Timestamp, SqlValue::Timestamp(ts)) => Ok(Value::Timestamp(ts)),
        (FieldType::Timestamp, SqlValue::Text(s)) => {
            parse_timestamp(&field.name, &s).map(Value::Timestamp)
        }
        (FieldType::Timestamp, SqlValue::Int(millis)) => Utc
            .timestamp_millis_opt(millis)
            .single()
            .map(Value::Timestamp)
            .ok_or_else(|| ConversionError::Malformed {
                field: field.name.clone(),
                reason: format!("{} is not a valid epoch millisecond value", millis),
            }),
        (FieldType::Binary, SqlValue::Bytes(b)) => Ok(Value::Binary(b)),
        (FieldType::Map, SqlValue::Text(s)) => {
            let json: JsonValue =
                serde_json::from_str(&s).map_err(|e| ConversionError::Malformed {
                    field: field.name.clone(),
                    reason: e.to_string(),
                })?;
            Ok(Value::from_json(&json))
        }
        (_, other) => Err(unexpected(field, &other)),
    }
}

/// Decode a value for a column with no field descriptor.
pub fn untyped_value(raw: SqlValue) -> Value {
    match raw {
        SqlValue::Null => Value::Null,
        SqlValue::Text(s) => Value::Str(s),
        SqlValue::Int(i) => Value::Int(i),
        SqlValue::Real(f) => Value::Float(f),
        SqlValue::Bool(b) => Value::Bool(b),
        SqlValue::Timestamp(ts) => Value::Timestamp(ts),
        SqlValue::Bytes(b) => Value::Binary(b),
    }
}

fn unexpected(field: &FieldDef, raw: &SqlValue) -> ConversionError {
    ConversionError::Unsupported {
        field: field.name.clone(),
        expected: field.field_type.as_str().to_string(),
        got: raw.describe().to_string(),
    }
}

fn parse_text_scalar(field: &FieldDef, s: &str) -> Result<Value, ConversionError> {
    let malformed = |reason: String| ConversionError::Malformed {
        field: field.name.clone(),
        reason,
    };
    match field.field_type {
        FieldType::String => Ok(Value::Str(s.to_string())),
        FieldType::Integer => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| malformed(format!("{:?} is not an integer", s))),
        FieldType::Float => s
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| malformed(format!("{:?} is not a float", s))),
        FieldType::Boolean => parse_bool(&field.name, s).map(Value::Bool),
        FieldType::Timestamp => parse_timestamp(&field.name, s).map(Value::Timestamp),
        FieldType::Binary => hex::decode(s)
            .map(Value::Binary)
            .map_err(|e| malformed(e.to_string())),
        FieldType::Map => serde_json::from_str::<JsonValue>(s)
            .map(|j| Value::from_json(&j))
            .map_err(|e| malformed(e.to_string())),
    }
}

fn json_scalar(field: &FieldDef, json: &JsonValue) -> Result<Value, ConversionError> {
    match (field.field_type, json) {
        (_, JsonValue::Null) => Ok(Value::Null),
        (FieldType::Timestamp, JsonValue::String(s)) => {
            parse_timestamp(&field.name, s).map(Value::Timestamp)
        }
        (FieldType::Binary, JsonValue::String(s)) => parse_text_scalar(field, s),
        (FieldType::Float, JsonValue::Number(n)) => Ok(Value::Float(n.as_f64().unwrap_or_default())),
        _ => Ok(Value::from_json(json)),
    }
}

fn parse_bool(field: &str, s: &str) -> Result<bool, ConversionError> {
    match s.trim() {
        "true" | "TRUE" | "t" | "1" => Ok(true),
        "false" | "FALSE" | "f" | "0" => Ok(false),
        other => Err(ConversionError::Malformed {
            field: field.to_string(),
            reason: format!("{:?} is not a boolean", other),
        }),
    }
}

/// Parse RFC 3339 text, falling back to the `YYYY-MM-DD HH:MM:SS[.fff]` form.
pub fn parse_timestamp(field: &str, s: &str) -> Result<DateTime<Utc>, ConversionError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(ConversionError::Malformed {
        field: field.to_string(),
        reason: format!("{:?} is not a timestamp", s),
    })
}

/// Build a map value from string pairs.
pub fn map_of<I, K, V>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    let m: BTreeMap<String, Value> = pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Value::Map(m)
}

// =============================================================================
// TESTS
// =============================================================================
