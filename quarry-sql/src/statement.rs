//! Compiled statements

use crate::aliases::ColumnAliases;
use quarry_core::types::{from_sql_value, to_sql_value, untyped_value};
use quarry_core::{ConversionError, FieldDef, Record, SqlValue, Value};
use std::collections::HashMap;
use std::fmt;

/// Topic and shard a statement was compiled for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementScope {
    pub topic: String,
    pub shard: String,
}

impl StatementScope {
    pub fn new(topic: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            shard: shard.into(),
        }
    }
}

/// A rewritten template, ready for repeated execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub scope: StatementScope,
    pub name: String,
    /// The trimmed template as written.
    pub original: String,
    /// Executable SQL with positional placeholders.
    pub sql: String,
    /// Declared fields, followed by any reserved fields they do not shadow.
    pub fields: HashMap<String, FieldDef>,
    /// Parameter names in placeholder order.
    pub bind_fields: Vec<String>,
    /// Descriptor for each placeholder, in the same order as `bind_fields`.
    pub bind_defs: Vec<FieldDef>,
    /// The statement returns auto-generated key values.
    pub returns_generated_keys: bool,
}

impl CompiledStatement {
    /// Identity of this statement within a session's statement cache.
    pub fn session_key(&self) -> String {
        format!("{}@{}:{}", self.name, self.scope.shard, self.scope.topic)
    }

    pub fn with_generated_keys(mut self) -> Self {
        self.returns_generated_keys = true;
        self
    }

    /// Encode parameters in placeholder order. Missing parameters bind as null.
    pub fn bind(&self, params: &Record) -> Result<Vec<SqlValue>, ConversionError> {
        self.bind_defs
            .iter()
            .map(|def| {
                let value = params.get(&def.name).unwrap_or(&Value::Null);
                to_sql_value(def, value)
            })
            .collect()
    }

    /// Decode a driver row into a record keyed by field names. Null columns are omitted.
    pub fn decode_row(
        &self,
        aliases: &ColumnAliases,
        row: Vec<(String, SqlValue)>,
    ) -> Result<Record, ConversionError> {
        let mut record = Record::new();
        for (column, raw) in row {
            if raw.is_null() {
                continue;
            }
            let field = aliases.field_name(&column);
            let value = match self.fields.get(&field) {
                Some(def) => from_sql_value(def, raw)?,
                None => untyped_value(raw),
            };
            record.set(field, value);
        }
        Ok(record)
    }
}

impl fmt::Display for CompiledStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.session_key(), self.sql)
    }
}
