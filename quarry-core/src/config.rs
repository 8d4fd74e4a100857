//! Layered dotted-key configuration
//!
//! Database and topic routing settings are addressed by dotted keys such as
//! `db.primary.hostname` or `dbTopic.auth.dbName`. Values come from TOML
//! sources, code, and environment overrides, in that order of precedence
//! (later wins).
//!
//! Environment overrides use the `QUARRY__` prefix with `__` as the key
//! separator: `QUARRY__db__primary__hostname=db1` sets `db.primary.hostname`.
//! Key case is preserved.

use crate::error::ConfigError;
use serde_json::{Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::Path;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "QUARRY__";
/// Prefix for environment-provided private values.
pub const PRIVATE_ENV_PREFIX: &str = "QUARRY_PRIVATE_";
/// Section holding private values such as passwords.
pub const PRIVATE_SECTION: &str = "private";

/// Flattened configuration store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigStore {
    values: BTreeMap<String, JsonValue>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document and flatten its tables into dotted keys.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let mut store = Self::new();
        store.merge_toml_str("<inline>", source)?;
        Ok(store)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut store = Self::new();
        store.merge_toml_str(&path.display().to_string(), &source)?;
        Ok(store)
    }

    /// Merge another TOML document on top of the current values.
    pub fn merge_toml_str(&mut self, source_name: &str, source: &str) -> Result<(), ConfigError> {
        let table: toml::Table = source.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })?;
        for (k, v) in table {
            flatten_toml(&mut self.values, k, v);
        }
        Ok(())
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Apply `QUARRY__a__b=value` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply overrides from an explicit list of environment-style pairs.
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, raw) in vars {
            if let Some(rest) = name.strip_prefix(ENV_PREFIX) {
                let key = rest.split("__").collect::<Vec<_>>().join(".");
                if !key.is_empty() {
                    self.values.insert(key, parse_scalar(&raw));
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// String value for a key. Numbers and booleans are rendered as text.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }

    pub fn require_str(&self, key: &str) -> Result<String, ConfigError> {
        self.get_str(key).ok_or_else(|| ConfigError::MissingRequired {
            field: key.to_string(),
        })
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(JsonValue::Bool(b)) => Ok(*b),
            Some(JsonValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(invalid(key, s, "expected a boolean")),
            },
            Some(other) => Err(invalid(key, &other.to_string(), "expected a boolean")),
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(JsonValue::Number(n)) => n
                .as_i64()
                .ok_or_else(|| invalid(key, &n.to_string(), "expected an integer")),
            Some(JsonValue::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| invalid(key, s, "expected an integer")),
            Some(other) => Err(invalid(key, &other.to_string(), "expected an integer")),
        }
    }

    /// Private value looked up by indirection key, from `private.<key>` or
    /// the `QUARRY_PRIVATE_<KEY>` environment variable.
    pub fn private_str(&self, key: &str) -> Option<String> {
        if let Some(v) = self.get_str(&format!("{}.{}", PRIVATE_SECTION, key)) {
            return Some(v);
        }
        let env_name = format!(
            "{}{}",
            PRIVATE_ENV_PREFIX,
            key.replace(['.', '-'], "_").to_ascii_uppercase()
        );
        std::env::var(env_name).ok()
    }

    /// Distinct second-level names under a prefix, e.g. database names under `db`.
    pub fn child_names(&self, prefix: &str) -> Vec<String> {
        let lead = format!("{}.", prefix);
        let mut names: Vec<String> = self
            .values
            .keys()
            .filter_map(|k| k.strip_prefix(&lead))
            .filter_map(|rest| rest.split('.').next())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_scalar(raw: &str) -> JsonValue {
    match raw {
        "true" => return JsonValue::Bool(true),
        "false" => return JsonValue::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return JsonValue::Number(Number::from(i));
    }
    JsonValue::String(raw.to_string())
}

fn flatten_toml(out: &mut BTreeMap<String, JsonValue>, key: String, value: toml::Value) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                flatten_toml(out, format!("{}.{}", key, k), v);
            }
        }
        other => {
            out.insert(key, toml_to_json(other));
        }
    }
}

fn toml_to_json(value: toml::Value) -> JsonValue {
    match value {
        toml::Value::String(s) => JsonValue::String(s),
        toml::Value::Integer(i) => JsonValue::Number(Number::from(i)),
        toml::Value::Float(f) => Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        toml::Value::Boolean(b) => JsonValue::Bool(b),
        toml::Value::Datetime(dt) => JsonValue::String(dt.to_string()),
        toml::Value::Array(items) => JsonValue::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => JsonValue::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        inMemorySimulation = false

        [db.primary]
        dbType = "postgresql"
        hostname = "db1:5433"
        database = "quarry"
        numConnections = 8

        [dbTopic.auth]
        dbName = "authdb"

        [private]
        primaryPassword = "hunter2"
    "#;

    #[test]
    fn test_flattens_nested_tables() {
        let store = ConfigStore::from_toml_str(SAMPLE).expect("sample should parse");
        assert_eq!(store.get_str("db.primary.dbType").as_deref(), Some("postgresql"));
        assert_eq!(store.get_i64("db.primary.numConnections", 20).expect("int"), 8);
        assert_eq!(store.get_str("dbTopic.auth.dbName").as_deref(), Some("authdb"));
        assert!(!store.get_bool("inMemorySimulation", true).expect("bool"));
    }

    #[test]
    fn test_defaults_apply_when_missing() {
        let store = ConfigStore::new();
        assert_eq!(store.get_i64("db.primary.numConnections", 20).expect("int"), 20);
        assert_eq!(store.get_str_or("db.primary.dbType", "sqlite"), "sqlite");
    }

    #[test]
    fn test_require_reports_missing_key() {
        let store = ConfigStore::new();
        let err = store.require_str("db.primary.hostname").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "db.primary.hostname".to_string()
            }
        );
    }

    #[test]
    fn test_env_style_overrides_win() {
        let mut store = ConfigStore::from_toml_str(SAMPLE).expect("sample should parse");
        store.apply_overrides(vec![
            ("QUARRY__db__primary__hostname".to_string(), "db2".to_string()),
            ("QUARRY__db__primary__numConnections".to_string(), "3".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ]);
        assert_eq!(store.get_str("db.primary.hostname").as_deref(), Some("db2"));
        assert_eq!(store.get_i64("db.primary.numConnections", 20).expect("int"), 3);
        assert!(!store.contains("UNRELATED"));
    }

    #[test]
    fn test_invalid_boolean() {
        let store = ConfigStore::new().with("inMemorySimulation", "maybe");
        assert!(matches!(
            store.get_bool("inMemorySimulation", false),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_private_lookup_from_section() {
        let store = ConfigStore::from_toml_str(SAMPLE).expect("sample should parse");
        assert_eq!(store.private_str("primaryPassword").as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_child_names() {
        let store = ConfigStore::new()
            .with("db.primary.dbType", "sqlite")
            .with("db.primary.path", "/tmp/a.db")
            .with("db.reports.dbType", "sqlite");
        assert_eq!(store.child_names("db"), vec!["primary", "reports"]);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("quarry.toml");
        std::fs::write(&path, SAMPLE).expect("write should succeed");
        let store = ConfigStore::from_file(&path).expect("file should load");
        assert!(store.contains("db.primary.database"));
    }
}
