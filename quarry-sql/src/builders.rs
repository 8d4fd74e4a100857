//! Canonical statement templates
//!
//! Every table gets four statements synthesized from its descriptor:
//! insert (`i<Table>`), primary-key select (`q<Table>`), primary-key update
//! (`u<Table>`) and touch-lock update (`uTran<Table>`).

use crate::compiler::{compile, Resolver};
use crate::statement::{CompiledStatement, StatementScope};
use quarry_core::{CodeError, TableDef, CREATED_DATE, TOUCHED_DATE};

pub fn insert_name(table: &str) -> String {
    format!("i{}", table)
}

pub fn select_name(table: &str) -> String {
    format!("q{}", table)
}

pub fn update_name(table: &str) -> String {
    format!("u{}", table)
}

pub fn touch_lock_name(table: &str) -> String {
    format!("uTran{}", table)
}

/// ` WHERE c:a = :a AND c:b = :b`, or nothing for an empty filter.
pub fn and_clause(and_fields: &[String]) -> String {
    if and_fields.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = and_fields
        .iter()
        .map(|f| format!("c:{} = :{}", f, f))
        .collect();
    format!(" WHERE {}", parts.join(" AND "))
}

/// Insert of all non-auto-increment fields. Tables with an auto-increment
/// field return its generated value.
pub fn insert_template(table: &TableDef) -> String {
    let names: Vec<&str> = table
        .fields
        .iter()
        .filter(|f| !f.auto_increment)
        .map(|f| f.name.as_str())
        .collect();
    let mut sql = format!(
        "INSERT INTO t:{} (c:{}) VALUES (:{})",
        table.name,
        names.join(", c:"),
        names.join(", :")
    );
    if let Some(auto) = table.auto_increment_field() {
        sql.push_str(&format!(" RETURNING c:{}", auto.name));
    }
    sql
}

pub fn select_template(table_name: &str, and_fields: &[String]) -> String {
    format!("SELECT * FROM t:{}{}", table_name, and_clause(and_fields))
}

pub fn update_template(table_name: &str, set_fields: &[&str], and_fields: &[String]) -> String {
    let sets: Vec<String> = set_fields
        .iter()
        .map(|f| format!("c:{} = :{}", f, f))
        .collect();
    format!(
        "UPDATE t:{} SET {}{}",
        table_name,
        sets.join(", "),
        and_clause(and_fields)
    )
}

/// Fields written back by the primary-key update: everything except keys,
/// auto-increment columns, the touch timestamp and the created date.
pub fn updatable_fields(table: &TableDef) -> Vec<&str> {
    table
        .fields
        .iter()
        .filter(|f| {
            !f.auto_increment
                && !table.is_primary_key(&f.name)
                && f.name != TOUCHED_DATE
                && f.name != CREATED_DATE
        })
        .map(|f| f.name.as_str())
        .collect()
}

/// The canonical statements for one table.
///
/// `update` is absent when the table has nothing to write back and
/// `touch_lock` is absent when it has no touch timestamp; only lock tables
/// need both.
#[derive(Debug, Clone)]
pub struct CanonicalStatements {
    pub table: String,
    pub insert: CompiledStatement,
    pub select: CompiledStatement,
    pub update: Option<CompiledStatement>,
    pub touch_lock: Option<CompiledStatement>,
}

impl CanonicalStatements {
    /// Compile the canonical statements for `table`. The table must have a
    /// primary key.
    pub fn build<R: Resolver + ?Sized>(
        resolver: &R,
        scope: &StatementScope,
        table: &TableDef,
    ) -> Result<Self, CodeError> {
        table.validate()?;

        let mut insert = compile(
            resolver,
            scope,
            &insert_name(&table.name),
            &table.fields,
            &insert_template(table),
        );
        if table.auto_increment_field().is_some() {
            insert = insert.with_generated_keys();
        }
        let select = compile(
            resolver,
            scope,
            &select_name(&table.name),
            &table.fields,
            &select_template(&table.name, &table.primary_key),
        );

        let updatable = updatable_fields(table);
        let update = (!updatable.is_empty()).then(|| {
            compile(
                resolver,
                scope,
                &update_name(&table.name),
                &table.fields,
                &update_template(&table.name, &updatable, &table.primary_key),
            )
        });
        let touch_lock = table.has_field(TOUCHED_DATE).then(|| {
            compile(
                resolver,
                scope,
                &touch_lock_name(&table.name),
                &table.fields,
                &update_template(&table.name, &[TOUCHED_DATE], &table.primary_key),
            )
        });

        Ok(Self {
            table: table.name.clone(),
            insert,
            select,
            update,
            touch_lock,
        })
    }

    pub fn update(&self) -> Result<&CompiledStatement, CodeError> {
        self.update.as_ref().ok_or_else(|| CodeError::Invariant {
            reason: format!("table {} has no updatable fields", self.table),
        })
    }

    pub fn touch_lock(&self) -> Result<&CompiledStatement, CodeError> {
        self.touch_lock
            .as_ref()
            .ok_or_else(|| CodeError::TouchColumnMissing {
                table: self.table.clone(),
            })
    }
}

/// Select filtered by an AND of equality tests on `and_fields`.
pub fn named_select<R: Resolver + ?Sized>(
    resolver: &R,
    scope: &StatementScope,
    name: &str,
    table: &TableDef,
    and_fields: &[String],
) -> CompiledStatement {
    compile(
        resolver,
        scope,
        name,
        &table.fields,
        &select_template(&table.name, and_fields),
    )
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::ident::to_lower_case_identifier;
    use quarry_core::{FieldDef, FieldType};

    struct SnakeResolver;

    impl Resolver for SnakeResolver {
        fn table_name(&self, table: &str) -> String {
            to_lower_case_identifier(table)
        }

        fn column_name(&self, field: &str) -> String {
            to_lower_case_identifier(field)
        }

        fn reserved_fields(&self) -> &[FieldDef] {
            &[]
        }
    }

    fn counter_table() -> TableDef {
        TableDef::new("WordCounter")
            .field(FieldDef::new("word", FieldType::String).required())
            .field(FieldDef::new("hits", FieldType::Integer))
            .primary_key(&["word"])
            .with_protocol_fields()
    }

    fn scope() -> StatementScope {
        StatementScope::new("words", "primary")
    }

    #[test]
    fn test_insert_template_lists_fields() {
        let table = TableDef::new("Item")
            .field(FieldDef::new("id", FieldType::Integer).auto_increment())
            .field(FieldDef::new("name", FieldType::String))
            .primary_key(&["id"]);
        assert_eq!(
            insert_template(&table),
            "INSERT INTO t:Item (c:name) VALUES (:name) RETURNING c:id"
        );
    }

    #[test]
    fn test_canonical_statements() {
        let stmts = CanonicalStatements::build(&SnakeResolver, &scope(), &counter_table())
            .expect("build should succeed");

        assert_eq!(stmts.insert.name, "iWordCounter");
        assert!(stmts.insert.sql.starts_with("INSERT INTO word_counter (word, hits, last_tran_id"));
        assert!(!stmts.insert.returns_generated_keys);

        assert_eq!(stmts.select.name, "qWordCounter");
        assert_eq!(stmts.select.sql, "SELECT * FROM word_counter WHERE word = ?;");
        assert_eq!(stmts.select.bind_fields, vec!["word".to_string()]);

        let update = stmts.update().expect("update should exist");
        assert_eq!(update.name, "uWordCounter");
        assert!(!update.sql.contains("touched_date"));
        assert!(!update.sql.contains("created_date"));
        assert!(update.sql.contains("hits = ?"));
        assert!(update.sql.ends_with("WHERE word = ?;"));
        assert_eq!(update.bind_fields.last().map(String::as_str), Some("word"));

        let touch_lock = stmts.touch_lock().expect("touch lock should exist");
        assert_eq!(touch_lock.name, "uTranWordCounter");
        assert_eq!(
            touch_lock.sql,
            "UPDATE word_counter SET touched_date = ? WHERE word = ?;"
        );
        assert_eq!(
            touch_lock.bind_fields,
            vec!["touchedDate".to_string(), "word".to_string()]
        );
    }

    #[test]
    fn test_lock_table_requires_touch_column() {
        let table = TableDef::new("NoTouch")
            .field(FieldDef::new("id", FieldType::String))
            .field(FieldDef::new("v", FieldType::String))
            .primary_key(&["id"]);
        let stmts = CanonicalStatements::build(&SnakeResolver, &scope(), &table)
            .expect("build should succeed");
        assert!(stmts.update.is_some());
        let err = stmts.touch_lock().unwrap_err();
        assert!(matches!(err, CodeError::TouchColumnMissing { .. }));
    }

    #[test]
    fn test_named_select_with_compound_filter() {
        let stmt = named_select(
            &SnakeResolver,
            &scope(),
            "qByHitsAndWord",
            &counter_table(),
            &["hits".to_string(), "word".to_string()],
        );
        assert_eq!(
            stmt.sql,
            "SELECT * FROM word_counter WHERE hits = ? AND word = ?;"
        );
        assert_eq!(stmt.bind_defs[0].field_type, FieldType::Integer);
    }
}
