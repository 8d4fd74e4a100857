//! Field name to column name aliasing
//!
//! A [`ColumnAliases`] value is an immutable snapshot. New aliases are
//! published by building a fresh snapshot from the previous one plus the
//! additions and swapping it into the [`AliasRegistry`]; readers holding an
//! older `Arc` keep a complete, consistent view.

use quarry_core::ident::to_lower_case_identifier;
use quarry_core::FieldDef;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Immutable alias snapshot for one topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnAliases {
    field_to_col: HashMap<String, String>,
    col_to_field: HashMap<String, String>,
    convert_upper_to_lower: bool,
}

impl ColumnAliases {
    pub fn new(convert_upper_to_lower: bool) -> Self {
        Self {
            field_to_col: HashMap::new(),
            col_to_field: HashMap::new(),
            convert_upper_to_lower,
        }
    }

    /// New snapshot with `additions` layered on top of this one.
    pub fn updated<'a, I>(&self, additions: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut next = self.clone();
        for (field, col) in additions {
            next.col_to_field.insert(col.clone(), field.clone());
            next.field_to_col.insert(field.clone(), col.clone());
        }
        next
    }

    /// Physical column for a field. Unaliased fields map to themselves.
    pub fn column_name(&self, field: &str) -> String {
        self.field_to_col
            .get(field)
            .cloned()
            .unwrap_or_else(|| field.to_string())
    }

    /// Field for a physical column as reported by the driver.
    pub fn field_name(&self, column: &str) -> String {
        let column = if self.convert_upper_to_lower {
            column.to_ascii_lowercase()
        } else {
            column.to_string()
        };
        self.col_to_field.get(&column).cloned().unwrap_or(column)
    }

    /// Alias a declaration such as `createdDate DESC`, keeping the modifier.
    pub fn alias_declaration(&self, declaration: &str) -> String {
        let decl = declaration.trim();
        match decl.find(' ') {
            None => self.column_name(decl),
            Some(idx) => format!("{}{}", self.column_name(&decl[..idx]), &decl[idx..]),
        }
    }

    /// Comma-separated column list for field declarations.
    pub fn column_list(&self, declarations: &[String]) -> String {
        declarations
            .iter()
            .map(|d| self.alias_declaration(d))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn len(&self) -> usize {
        self.field_to_col.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_to_col.is_empty()
    }
}

/// Copy-on-write registry of alias snapshots keyed by topic.
#[derive(Debug)]
pub struct AliasRegistry {
    snapshots: RwLock<HashMap<String, Arc<ColumnAliases>>>,
    convert_upper_to_lower: bool,
    case_sensitive: bool,
}

impl AliasRegistry {
    pub fn new(convert_upper_to_lower: bool, case_sensitive: bool) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            convert_upper_to_lower,
            case_sensitive,
        }
    }

    /// Current snapshot for a topic. Never blocks behind readers.
    pub fn get(&self, topic: &str) -> Arc<ColumnAliases> {
        let existing = match self.snapshots.read() {
            Ok(guard) => guard.get(topic).cloned(),
            Err(poisoned) => poisoned.into_inner().get(topic).cloned(),
        };
        existing.unwrap_or_else(|| Arc::new(ColumnAliases::new(self.convert_upper_to_lower)))
    }

    /// Publish additional aliases for a topic.
    pub fn add(&self, topic: &str, field_to_col: &HashMap<String, String>) {
        if field_to_col.is_empty() {
            return;
        }
        let mut guard = match self.snapshots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let base = guard
            .get(topic)
            .cloned()
            .unwrap_or_else(|| Arc::new(ColumnAliases::new(self.convert_upper_to_lower)));
        let next = base.updated(field_to_col.iter());
        guard.insert(topic.to_string(), Arc::new(next));
    }

    /// Register snake-case aliases for every field. No-op for case-sensitive engines.
    pub fn add_defaults(&self, topic: &str, fields: &[FieldDef]) {
        if self.case_sensitive {
            return;
        }
        let map: HashMap<String, String> = fields
            .iter()
            .map(|f| (f.name.clone(), to_lower_case_identifier(&f.name)))
            .collect();
        self.add(topic, &map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::FieldType;

    #[test]
    fn test_unaliased_fields_map_to_themselves() {
        let aliases = ColumnAliases::new(false);
        assert_eq!(aliases.column_name("plain"), "plain");
        assert_eq!(aliases.field_name("plain"), "plain");
    }

    #[test]
    fn test_alias_declaration_keeps_modifier() {
        let mut add = HashMap::new();
        add.insert("createdDate".to_string(), "created_date".to_string());
        let aliases = ColumnAliases::new(false).updated(add.iter());
        assert_eq!(aliases.alias_declaration("createdDate DESC"), "created_date DESC");
        assert_eq!(
            aliases.column_list(&["createdDate".to_string(), "other ASC".to_string()]),
            "created_date, other ASC"
        );
    }

    #[test]
    fn test_upper_case_columns_fold_before_lookup() {
        let mut add = HashMap::new();
        add.insert("userId".to_string(), "user_id".to_string());
        let aliases = ColumnAliases::new(true).updated(add.iter());
        assert_eq!(aliases.field_name("USER_ID"), "userId");
    }

    #[test]
    fn test_registry_snapshots_are_copy_on_write() {
        let registry = AliasRegistry::new(false, false);
        registry.add_defaults("auth", &[FieldDef::new("userId", FieldType::Integer)]);
        let before = registry.get("auth");

        registry.add_defaults("auth", &[FieldDef::new("lastLogin", FieldType::Timestamp)]);
        let after = registry.get("auth");

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert_eq!(after.column_name("userId"), "user_id");
        assert_eq!(after.column_name("lastLogin"), "last_login");
    }

    #[test]
    fn test_case_sensitive_registry_skips_defaults() {
        let registry = AliasRegistry::new(false, true);
        registry.add_defaults("auth", &[FieldDef::new("userId", FieldType::Integer)]);
        assert!(registry.get("auth").is_empty());
    }
}
