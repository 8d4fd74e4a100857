//! Table and field descriptors
//!
//! Descriptors are authored elsewhere and consumed read-only. They can be
//! built in code or deserialized from TOML/JSON catalogs.

use crate::error::CodeError;
use serde::{Deserialize, Serialize};

// ============================================================================
// PROTOCOL FIELDS
// ============================================================================

/// Touch timestamp advanced by every lock attempt.
pub const TOUCHED_DATE: &str = "touchedDate";
/// Identifier of the last transaction completed against a row.
pub const LAST_TRAN_ID: &str = "lastTranId";
pub const CREATED_DATE: &str = "createdDate";
pub const MODIFIED_DATE: &str = "modifiedDate";
pub const ENABLED: &str = "enabled";
pub const USER_ID: &str = "userId";
pub const USER_GROUP: &str = "userGroup";

/// Transaction id stamped on freshly inserted placeholder rows.
pub const INITIAL_INSERT: &str = "INITIAL_INSERT";

/// Semantic field types understood by the type mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Timestamp,
    Boolean,
    Binary,
    /// Free-form structure stored as JSON text.
    Map,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Timestamp => "timestamp",
            FieldType::Boolean => "boolean",
            FieldType::Binary => "binary",
            FieldType::Map => "map",
        }
    }
}

/// A single field of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Values are lists of `field_type`.
    #[serde(default)]
    pub is_list: bool,
    /// List elements never contain commas, so a comma-joined encoding is safe.
    #[serde(default)]
    pub no_commas: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub auto_increment: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_list: false,
            no_commas: false,
            required: false,
            auto_increment: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn list(mut self) -> Self {
        self.is_list = true;
        self
    }

    pub fn no_commas(mut self) -> Self {
        self.no_commas = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// A secondary index declaration.
///
/// Field declarations may carry a trailing modifier such as `createdDate DESC`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    #[serde(default)]
    pub name: Option<String>,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    pub fn new(fields: &[&str]) -> Self {
        Self {
            name: None,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A table descriptor: ordered fields, primary key and indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn primary_key(mut self, fields: &[&str]) -> Self {
        self.primary_key = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Append the standard protocol fields a lock table needs, skipping any already declared.
    pub fn with_protocol_fields(mut self) -> Self {
        for f in protocol_fields() {
            if self.get_field(&f.name).is_none() {
                self.fields.push(f);
            }
        }
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    pub fn auto_increment_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.auto_increment)
    }

    /// Check that the descriptor is internally consistent.
    pub fn validate(&self) -> Result<(), CodeError> {
        if self.primary_key.is_empty() {
            return Err(CodeError::MissingPrimaryKey {
                table: self.name.clone(),
            });
        }
        for (i, f) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|prev| prev.name == f.name) {
                return Err(CodeError::Invariant {
                    reason: format!("field {} declared twice in {}", f.name, self.name),
                });
            }
        }
        for k in &self.primary_key {
            if !self.has_field(k) {
                return Err(CodeError::UnknownField {
                    table: self.name.clone(),
                    field: k.clone(),
                });
            }
        }
        for idx in &self.indexes {
            for decl in &idx.fields {
                let name = decl.split_whitespace().next().unwrap_or_default();
                if !self.has_field(name) {
                    return Err(CodeError::UnknownField {
                        table: self.name.clone(),
                        field: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A collection of table descriptors, as loaded from a catalog file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCatalog {
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

/// The bookkeeping fields every lock table carries.
pub fn protocol_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::new(LAST_TRAN_ID, FieldType::String),
        FieldDef::new(TOUCHED_DATE, FieldType::Timestamp),
        FieldDef::new(CREATED_DATE, FieldType::Timestamp),
        FieldDef::new(MODIFIED_DATE, FieldType::Timestamp),
        FieldDef::new(ENABLED, FieldType::Boolean),
    ]
}

/// Fields any statement may bind without declaring them.
pub fn reserved_fields() -> Vec<FieldDef> {
    let mut fields = protocol_fields();
    fields.push(FieldDef::new(USER_ID, FieldType::Integer));
    fields.push(FieldDef::new(USER_GROUP, FieldType::String));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_table() -> TableDef {
        TableDef::new("AuthUser")
            .field(FieldDef::new("userId", FieldType::Integer).required())
            .field(FieldDef::new("username", FieldType::String).required())
            .field(FieldDef::new("roles", FieldType::String).list().no_commas())
            .primary_key(&["userId"])
            .index(IndexDef::new(&["username"]).unique())
            .with_protocol_fields()
    }

    #[test]
    fn test_validate_accepts_well_formed_table() {
        assert!(user_table().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_key() {
        let table = TableDef::new("Broken")
            .field(FieldDef::new("a", FieldType::String))
            .primary_key(&["b"]);
        assert!(matches!(
            table.validate(),
            Err(CodeError::UnknownField { field, .. }) if field == "b"
        ));
    }

    #[test]
    fn test_validate_index_with_modifier() {
        let table = user_table().index(IndexDef::new(&["createdDate DESC"]));
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_protocol_fields_not_duplicated() {
        let table = user_table().with_protocol_fields();
        let count = table
            .fields
            .iter()
            .filter(|f| f.name == TOUCHED_DATE)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_catalog_from_toml() {
        let src = r#"
            [[tables]]
            name = "Counter"
            primaryKey = ["counterId"]

            [[tables.fields]]
            name = "counterId"
            type = "string"
            required = true

            [[tables.fields]]
            name = "tags"
            type = "string"
            isList = true
            noCommas = true
        "#;
        let catalog: TableCatalog = toml::from_str(src).expect("catalog should parse");
        let table = &catalog.tables[0];
        assert_eq!(table.name, "Counter");
        assert!(table.fields[1].is_list);
        assert!(table.fields[1].no_commas);
        assert_eq!(table.primary_key, vec!["counterId".to_string()]);
    }
}
