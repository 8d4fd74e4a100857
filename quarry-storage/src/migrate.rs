//! Schema migration
//!
//! Brings a physical table in line with its descriptor: create it when it
//! has no columns, otherwise add missing columns one statement at a time,
//! then create any declared index whose column signature is not present.
//! Columns are never dropped or altered.

use crate::database::Database;
use crate::session::PooledSession;
use quarry_core::ident::unique_shorter;
use quarry_core::types::column_type;
use quarry_core::{ExecCxt, IndexDef, QuarryResult, TableDef};
use quarry_sql::ColumnAliases;
use std::collections::HashSet;
use tracing::info;

/// Length budget for generated index names.
pub const MAX_INDEX_NAME_LEN: usize = 60;

/// What a migration pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub table: String,
    pub created: bool,
    pub added_columns: Vec<String>,
    pub created_indexes: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        !self.created && self.added_columns.is_empty() && self.created_indexes.is_empty()
    }
}

impl Database {
    /// Migrate `table` for the caller's shard once per process.
    ///
    /// Returns `true` when this call performed the migration, so callers can
    /// provision initial rows exactly once.
    pub async fn ensure_table(
        &self,
        cxt: &ExecCxt,
        topic: &str,
        separate_storage: bool,
        table: &TableDef,
    ) -> QuarryResult<bool> {
        Ok(self
            .migrate_table(&cxt.shard, topic, separate_storage, table)
            .await?
            .is_some())
    }

    /// Like [`Database::ensure_table`], reporting the changes made. `None`
    /// means the table was already migrated in this process.
    pub async fn migrate_table(
        &self,
        shard: &str,
        topic: &str,
        separate_storage: bool,
        table: &TableDef,
    ) -> QuarryResult<Option<MigrationReport>> {
        let physical = self.physical_table_name(shard, &table.name, separate_storage);
        if self.migrated.lock().await.contains(&physical) {
            return Ok(None);
        }
        let mut session = self.session().await?;
        self.migrate_table_in(&mut session, shard, topic, separate_storage, table)
            .await
    }

    /// Migrate using a session the caller already holds.
    pub async fn migrate_table_in(
        &self,
        session: &mut PooledSession,
        shard: &str,
        topic: &str,
        separate_storage: bool,
        table: &TableDef,
    ) -> QuarryResult<Option<MigrationReport>> {
        table.validate()?;
        let physical = self.physical_table_name(shard, &table.name, separate_storage);

        let mut migrated = self.migrated.lock().await;
        if migrated.contains(&physical) {
            return Ok(None);
        }

        self.add_default_aliases(topic, &table.fields);
        let aliases = self.aliases(topic);
        let report = self.apply_table(session, &physical, table, &aliases).await?;

        if report.is_noop() {
            info!(database = %self.name(), table = %physical, "Table already up to date");
        } else {
            info!(
                database = %self.name(),
                table = %physical,
                created = report.created,
                added_columns = report.added_columns.len(),
                created_indexes = report.created_indexes.len(),
                "Migrated table"
            );
        }
        migrated.insert(physical);
        Ok(Some(report))
    }

    async fn apply_table(
        &self,
        session: &mut PooledSession,
        physical: &str,
        table: &TableDef,
        aliases: &ColumnAliases,
    ) -> QuarryResult<MigrationReport> {
        let mut report = MigrationReport {
            table: physical.to_string(),
            ..MigrationReport::default()
        };

        let existing: HashSet<String> = session
            .table_columns(physical)
            .await?
            .into_iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if existing.is_empty() {
            let ddl = self.create_table_sql(physical, table, aliases);
            self.execute_schema_change(session, physical, &ddl).await?;
            report.created = true;
        } else {
            for field in &table.fields {
                let column = aliases.column_name(&field.name);
                if existing.contains(&column.to_ascii_lowercase()) {
                    continue;
                }
                let ddl = format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    physical,
                    column,
                    column_type(field, self.dialect())
                );
                self.execute_schema_change(session, physical, &ddl).await?;
                report.added_columns.push(column);
            }
        }

        let signatures: HashSet<String> = session
            .table_indexes(physical)
            .await?
            .iter()
            .map(|i| i.signature())
            .collect();
        for index in &table.indexes {
            let columns = index_columns(index, aliases);
            let signature = columns
                .iter()
                .map(|c| c.to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(":");
            if signatures.contains(&signature) {
                continue;
            }
            let name = index_name(physical, index, &columns);
            let ddl = format!(
                "CREATE {}INDEX {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                name,
                physical,
                aliases.column_list(&index.fields)
            );
            self.execute_schema_change(session, physical, &ddl).await?;
            report.created_indexes.push(name);
        }

        Ok(report)
    }

    fn create_table_sql(&self, physical: &str, table: &TableDef, aliases: &ColumnAliases) -> String {
        let mut clauses: Vec<String> = table
            .fields
            .iter()
            .map(|f| {
                let mut clause = format!(
                    "{} {}",
                    aliases.column_name(&f.name),
                    column_type(f, self.dialect())
                );
                if f.required {
                    clause.push_str(" NOT NULL");
                }
                clause
            })
            .collect();
        let key: Vec<String> = table
            .primary_key
            .iter()
            .map(|k| aliases.column_name(k))
            .collect();
        clauses.push(format!("PRIMARY KEY ({})", key.join(", ")));
        format!("CREATE TABLE {} ({})", physical, clauses.join(", "))
    }
}

/// Physical column names of an index, without ordering modifiers.
fn index_columns(index: &IndexDef, aliases: &ColumnAliases) -> Vec<String> {
    index
        .fields
        .iter()
        .filter_map(|d| d.split_whitespace().next())
        .map(|f| aliases.column_name(f))
        .collect()
}

fn index_name(physical: &str, index: &IndexDef, columns: &[String]) -> String {
    let suffix = match &index.name {
        Some(name) => name.clone(),
        None => columns.join("_"),
    };
    unique_shorter(&format!("idx_{}_{}", physical, suffix), MAX_INDEX_NAME_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{DialectOptions, FieldDef, FieldType};
    use quarry_sql::AliasRegistry;

    fn words() -> TableDef {
        TableDef::new("WordCounter")
            .field(FieldDef::new("word", FieldType::String).required())
            .field(FieldDef::new("hitCount", FieldType::Integer))
            .primary_key(&["word"])
            .index(IndexDef::new(&["hitCount DESC"]))
    }

    fn snake_aliases(table: &TableDef) -> std::sync::Arc<ColumnAliases> {
        let registry = AliasRegistry::new(false, false);
        registry.add_defaults("t", &table.fields);
        registry.get("t")
    }

    #[test]
    fn test_index_name_defaults_to_columns() {
        let aliases = snake_aliases(&words());
        let index = &words().indexes[0];
        let columns = index_columns(index, &aliases);
        assert_eq!(columns, vec!["hit_count".to_string()]);
        assert_eq!(index_name("word_counter", index, &columns), "idx_word_counter_hit_count");
    }

    #[test]
    fn test_long_index_names_are_shortened() {
        let index = IndexDef::new(&["a"]).named("x".repeat(80));
        let name = index_name("some_table", &index, &["a".to_string()]);
        assert!(name.len() <= MAX_INDEX_NAME_LEN);
        assert!(name.starts_with("idx_some_table_"));
    }

    #[test]
    fn test_create_table_sql() {
        let connector = crate::driver::SqliteConnector::memory("m", "primary")
            .expect("open should succeed");
        let db = Database::new(
            "m",
            crate::driver::Connector::Sqlite(connector),
            DialectOptions::sqlite(),
            1,
        );
        let table = words();
        let aliases = snake_aliases(&table);
        assert_eq!(
            db.create_table_sql("word_counter", &table, &aliases),
            "CREATE TABLE word_counter (word varchar NOT NULL, hit_count bigint, PRIMARY KEY (word))"
        );
    }
}
