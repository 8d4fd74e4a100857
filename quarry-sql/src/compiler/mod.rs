//! Template compiler
//!
//! Rewrites a symbolic template into executable SQL:
//!
//! - `:name` becomes a positional placeholder and `name` is appended to the
//!   bind order
//! - `t:Name` becomes the physical table name for the active topic and shard
//! - `c:name` becomes the aliased column name
//!
//! ```text
//! select * from t:myTable where c:myField = :myValue
//! ```
//!
//! compiles to `select * from my_table where my_field = ?;` with bind order
//! `["myValue"]`.

use crate::lexer::{Lexer, TokenKind};
use crate::statement::{CompiledStatement, StatementScope};
use quarry_core::{FieldDef, FieldType};
use std::collections::HashMap;
use std::fmt::Write;

/// Name resolution for one topic and shard.
pub trait Resolver {
    /// Physical table name for a symbolic table.
    fn table_name(&self, table: &str) -> String;

    /// Physical column name for a field.
    fn column_name(&self, field: &str) -> String;

    /// Fields any statement may bind without declaring them.
    fn reserved_fields(&self) -> &[FieldDef];

    /// Render placeholders as `$1, $2, ...` instead of `?`.
    fn numbered_placeholders(&self) -> bool {
        false
    }
}

/// Compile `template` against `resolver`.
pub fn compile<R: Resolver + ?Sized>(
    resolver: &R,
    scope: &StatementScope,
    name: &str,
    fields: &[FieldDef],
    template: &str,
) -> CompiledStatement {
    let original = template.trim();
    let numbered = resolver.numbered_placeholders();
    let mut sql = String::with_capacity(original.len() + 20);
    let mut bind_fields = Vec::new();

    for token in Lexer::new(original).tokenize() {
        match token.kind {
            TokenKind::BindParam(param) => {
                bind_fields.push(param);
                if numbered {
                    let _ = write!(sql, "${}", bind_fields.len());
                } else {
                    sql.push('?');
                }
            }
            TokenKind::TableRef(table) => sql.push_str(&resolver.table_name(&table)),
            TokenKind::ColumnRef(field) => sql.push_str(&resolver.column_name(&field)),
            TokenKind::Word(s) | TokenKind::Quoted(s) | TokenKind::Text(s) => sql.push_str(&s),
            TokenKind::Eof => {}
        }
    }

    if !original.ends_with(';') {
        sql.push(';');
    }

    let mut field_map: HashMap<String, FieldDef> = HashMap::new();
    for f in resolver.reserved_fields() {
        field_map.insert(f.name.clone(), f.clone());
    }
    for f in fields {
        field_map.insert(f.name.clone(), f.clone());
    }

    // Unknown parameters bind as untyped strings.
    let bind_defs = bind_fields
        .iter()
        .map(|b| {
            field_map
                .get(b)
                .cloned()
                .unwrap_or_else(|| FieldDef::new(b.clone(), FieldType::String))
        })
        .collect();

    CompiledStatement {
        scope: scope.clone(),
        name: name.to_string(),
        original: original.to_string(),
        sql,
        fields: field_map,
        bind_fields,
        bind_defs,
        returns_generated_keys: false,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{reserved_fields, Record, SqlValue};

    struct MapResolver {
        tables: HashMap<&'static str, &'static str>,
        columns: HashMap<&'static str, &'static str>,
        reserved: Vec<FieldDef>,
        numbered: bool,
    }

    impl MapResolver {
        fn new() -> Self {
            let mut tables = HashMap::new();
            tables.insert("Foo", "foo_tbl");
            let mut columns = HashMap::new();
            columns.insert("Bar", "bar_col");
            Self {
                tables,
                columns,
                reserved: reserved_fields(),
                numbered: false,
            }
        }
    }

    impl Resolver for MapResolver {
        fn table_name(&self, table: &str) -> String {
            self.tables.get(table).map(|s| s.to_string()).unwrap_or_else(|| table.to_string())
        }

        fn column_name(&self, field: &str) -> String {
            self.columns.get(field).map(|s| s.to_string()).unwrap_or_else(|| field.to_string())
        }

        fn reserved_fields(&self) -> &[FieldDef] {
            &self.reserved
        }

        fn numbered_placeholders(&self) -> bool {
            self.numbered
        }
    }

    fn scope() -> StatementScope {
        StatementScope::new("test", "primary")
    }

    #[test]
    fn test_compiles_markers_and_bind_order() {
        let resolver = MapResolver::new();
        let stmt = compile(
            &resolver,
            &scope(),
            "qFoo",
            &[],
            "select * from t:Foo where c:Bar = :Bar and c:Id = :Id",
        );
        assert_eq!(stmt.sql, "select * from foo_tbl where bar_col = ? and Id = ?;");
        assert_eq!(stmt.bind_fields, vec!["Bar".to_string(), "Id".to_string()]);
        assert_eq!(stmt.bind_defs.len(), 2);
    }

    #[test]
    fn test_numbered_placeholders() {
        let mut resolver = MapResolver::new();
        resolver.numbered = true;
        let stmt = compile(&resolver, &scope(), "u", &[], "update t:Foo set c:Bar = :a where x = :b;");
        assert_eq!(stmt.sql, "update foo_tbl set bar_col = $1 where x = $2;");
    }

    #[test]
    fn test_quoted_colon_is_not_a_parameter() {
        let resolver = MapResolver::new();
        let stmt = compile(&resolver, &scope(), "q", &[], "select 'a:b' from t:Foo");
        assert!(stmt.bind_fields.is_empty());
        assert_eq!(stmt.sql, "select 'a:b' from foo_tbl;");
    }

    #[test]
    fn test_trims_and_keeps_existing_semicolon() {
        let resolver = MapResolver::new();
        let stmt = compile(&resolver, &scope(), "q", &[], "  select 1;  ");
        assert_eq!(stmt.original, "select 1;");
        assert_eq!(stmt.sql, "select 1;");
    }

    #[test]
    fn test_bind_type_fallbacks() {
        let resolver = MapResolver::new();
        let declared = vec![FieldDef::new("count", FieldType::Integer)];
        let stmt = compile(
            &resolver,
            &scope(),
            "q",
            &declared,
            "select * from t:Foo where c:count = :count and c:enabled = :enabled and c:x = :x",
        );
        assert_eq!(stmt.bind_defs[0].field_type, FieldType::Integer);
        assert_eq!(stmt.bind_defs[1].field_type, FieldType::Boolean);
        assert_eq!(stmt.bind_defs[2].field_type, FieldType::String);

        let params = Record::new().with("count", 3).with("enabled", true).with("x", "y");
        let bound = stmt.bind(&params).expect("bind should succeed");
        assert_eq!(
            bound,
            vec![
                SqlValue::Int(3),
                SqlValue::Bool(true),
                SqlValue::Text("y".to_string())
            ]
        );
    }

    #[test]
    fn test_missing_parameter_binds_null() {
        let resolver = MapResolver::new();
        let stmt = compile(&resolver, &scope(), "q", &[], "select :a");
        let bound = stmt.bind(&Record::new()).expect("bind should succeed");
        assert_eq!(bound, vec![SqlValue::Null]);
    }

    #[test]
    fn test_session_key() {
        let resolver = MapResolver::new();
        let stmt = compile(&resolver, &scope(), "qFoo", &[], "select 1");
        assert_eq!(stmt.session_key(), "qFoo@primary:test");
    }
}
