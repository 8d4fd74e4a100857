//! Logical databases
//!
//! A [`Database`] is one connection target: its dialect, its session pool,
//! the per-topic column aliases and the set of tables already migrated in
//! this process.

use crate::driver::Connector;
use crate::session::{PooledSession, SessionPool, POOL_WAIT};
use futures_util::future::BoxFuture;
use quarry_core::ident::{capitalize, to_lower_case_identifier};
use quarry_core::types::untyped_value;
use quarry_core::{
    reserved_fields, DialectOptions, FieldDef, QuarryResult, Record, SqlError, Value,
    PRIMARY_SHARD,
};
use quarry_sql::{compile, AliasRegistry, ColumnAliases, CompiledStatement, Resolver, StatementScope};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct Database {
    name: String,
    dialect: DialectOptions,
    pool: Arc<SessionPool>,
    aliases: AliasRegistry,
    reserved: Vec<FieldDef>,
    pub(crate) migrated: tokio::sync::Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("engine", &self.dialect.engine)
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl Database {
    pub fn new(
        name: impl Into<String>,
        connector: Connector,
        dialect: DialectOptions,
        pool_size: usize,
    ) -> Self {
        Self::with_pool_wait(name, connector, dialect, pool_size, POOL_WAIT)
    }

    pub fn with_pool_wait(
        name: impl Into<String>,
        connector: Connector,
        dialect: DialectOptions,
        pool_size: usize,
        wait: Duration,
    ) -> Self {
        let name = name.into();
        let aliases = AliasRegistry::new(
            dialect.convert_upper_to_lower(),
            dialect.identifiers_case_sensitive,
        );
        Self {
            pool: Arc::new(SessionPool::with_wait(name.clone(), connector, pool_size, wait)),
            name,
            dialect,
            aliases,
            reserved: reserved_fields(),
            migrated: tokio::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> &DialectOptions {
        &self.dialect
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn reserved_fields(&self) -> &[FieldDef] {
        &self.reserved
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    pub async fn session(&self) -> Result<PooledSession, SqlError> {
        self.pool.acquire().await
    }

    /// Run `f` with a pooled session, returning the session afterwards.
    pub async fn with_session<T, F>(&self, f: F) -> QuarryResult<T>
    where
        F: for<'s> FnOnce(&'s mut PooledSession) -> BoxFuture<'s, QuarryResult<T>>,
    {
        let mut session = self.session().await?;
        f(&mut session).await
    }

    // ========================================================================
    // NAMING
    // ========================================================================

    pub fn aliases(&self, topic: &str) -> Arc<ColumnAliases> {
        self.aliases.get(topic)
    }

    pub fn add_aliases(&self, topic: &str, field_to_col: &HashMap<String, String>) {
        self.aliases.add(topic, field_to_col);
    }

    pub fn add_default_aliases(&self, topic: &str, fields: &[FieldDef]) {
        self.aliases.add_defaults(topic, fields);
    }

    /// Physical name of `table` for `shard`.
    ///
    /// Non-primary shards are prefixed when the dialect allows it and the
    /// topic keeps each shard in separate tables.
    pub fn physical_table_name(&self, shard: &str, table: &str, separate_storage: bool) -> String {
        let prefixed = self.dialect.use_shard_in_table_names
            && separate_storage
            && shard != PRIMARY_SHARD;
        let shard = sanitize_shard(shard);

        if self.dialect.identifiers_case_sensitive {
            let name = capitalize(table);
            return if prefixed {
                format!("{}{}", capitalize(&shard), name)
            } else {
                name
            };
        }

        let mut name = to_lower_case_identifier(table);
        if prefixed {
            name = format!("{}_{}", to_lower_case_identifier(&shard), name);
        }
        if !self.dialect.stores_lower_case_identifiers {
            name = name.to_uppercase();
        }
        name
    }

    /// Name resolution for statements compiled under `topic` and `shard`.
    pub fn resolver<'a>(&'a self, topic: &str, shard: &'a str, separate_storage: bool) -> DbResolver<'a> {
        DbResolver {
            db: self,
            shard,
            separate_storage,
            aliases: self.aliases(topic),
        }
    }

    /// Compile a bespoke template for a topic and shard.
    pub fn compile(
        &self,
        scope: &StatementScope,
        separate_storage: bool,
        name: &str,
        fields: &[FieldDef],
        template: &str,
    ) -> CompiledStatement {
        let resolver = self.resolver(&scope.topic, &scope.shard, separate_storage);
        compile(&resolver, scope, name, fields, template)
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    pub async fn execute_statement(
        &self,
        session: &mut PooledSession,
        stmt: &CompiledStatement,
        params: &Record,
    ) -> QuarryResult<u64> {
        session.execute(stmt, params).await
    }

    /// Rows decoded into records keyed by field name.
    pub async fn query_statement(
        &self,
        session: &mut PooledSession,
        stmt: &CompiledStatement,
        params: &Record,
    ) -> QuarryResult<Vec<Record>> {
        let raw = session.query(stmt, params).await?;
        let aliases = self.aliases(&stmt.scope.topic);
        let mut records = Vec::with_capacity(raw.len());
        for row in raw {
            records.push(stmt.decode_row(&aliases, row)?);
        }
        Ok(records)
    }

    pub async fn query_one_statement(
        &self,
        session: &mut PooledSession,
        stmt: &CompiledStatement,
        params: &Record,
    ) -> QuarryResult<Option<Record>> {
        Ok(self
            .query_statement(session, stmt, params)
            .await?
            .into_iter()
            .next())
    }

    /// Run an insert. Statements that return generated keys yield the first
    /// returned column of the first row.
    pub async fn insert_statement(
        &self,
        session: &mut PooledSession,
        stmt: &CompiledStatement,
        params: &Record,
    ) -> QuarryResult<Option<Value>> {
        if !stmt.returns_generated_keys {
            session.execute(stmt, params).await?;
            return Ok(None);
        }
        let rows = session.query(stmt, params).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .map(|(_, v)| untyped_value(v))
            .filter(|v| !v.is_null()))
    }

    /// Run a DDL statement. Failures are reported against `table`.
    pub async fn execute_schema_change(
        &self,
        session: &mut PooledSession,
        table: &str,
        sql: &str,
    ) -> Result<(), SqlError> {
        debug!(database = %self.name, table, sql, "Executing schema change");
        session.batch(table, sql).await.map_err(|e| match e {
            SqlError::Io { reason, .. } | SqlError::ConnectionLost { reason, .. } => {
                SqlError::SchemaChange {
                    database: self.name.clone(),
                    table: table.to_string(),
                    reason,
                }
            }
            other => other,
        })
    }
}

fn sanitize_shard(shard: &str) -> String {
    shard
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Resolves `t:` and `c:` markers against one Database, topic and shard.
pub struct DbResolver<'a> {
    db: &'a Database,
    shard: &'a str,
    separate_storage: bool,
    aliases: Arc<ColumnAliases>,
}

impl Resolver for DbResolver<'_> {
    fn table_name(&self, table: &str) -> String {
        self.db
            .physical_table_name(self.shard, table, self.separate_storage)
    }

    fn column_name(&self, field: &str) -> String {
        self.aliases.column_name(field)
    }

    fn reserved_fields(&self) -> &[FieldDef] {
        &self.db.reserved
    }

    fn numbered_placeholders(&self) -> bool {
        self.db.dialect.numbered_placeholders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteConnector;
    use quarry_core::{DbEngine, FieldType};

    fn memory_db(dialect: DialectOptions) -> Database {
        let connector = SqliteConnector::memory("test", "primary").expect("open should succeed");
        Database::new("test", Connector::Sqlite(connector), dialect, 1)
    }

    #[test]
    fn test_physical_names_fold_case_and_prefix_shards() {
        let db = memory_db(DialectOptions::sqlite());
        assert_eq!(db.physical_table_name("primary", "WordCounter", true), "word_counter");
        assert_eq!(db.physical_table_name("east", "WordCounter", true), "east_word_counter");
        assert_eq!(db.physical_table_name("east", "WordCounter", false), "word_counter");
        assert_eq!(db.physical_table_name("us-west", "Item", true), "us_west_item");
    }

    #[test]
    fn test_physical_names_for_other_identifier_rules() {
        let mut upper = DialectOptions::sqlite();
        upper.stores_lower_case_identifiers = false;
        let db = memory_db(upper);
        assert_eq!(db.physical_table_name("primary", "WordCounter", true), "WORD_COUNTER");

        let mut sensitive = DialectOptions::for_engine(DbEngine::Sqlite);
        sensitive.identifiers_case_sensitive = true;
        let db = memory_db(sensitive);
        assert_eq!(db.physical_table_name("east", "wordCounter", true), "EastWordCounter");
    }

    #[test]
    fn test_compile_uses_topic_aliases() {
        let db = memory_db(DialectOptions::sqlite());
        let fields = vec![FieldDef::new("hitCount", FieldType::Integer)];
        db.add_default_aliases("words", &fields);
        let stmt = db.compile(
            &StatementScope::new("words", "primary"),
            true,
            "qHits",
            &fields,
            "SELECT c:hitCount FROM t:WordCounter WHERE c:touchedDate > :touchedDate",
        );
        assert_eq!(
            stmt.sql,
            "SELECT hit_count FROM word_counter WHERE touchedDate > ?;"
        );
        assert_eq!(stmt.bind_defs[0].field_type, FieldType::Timestamp);
    }

    #[tokio::test]
    async fn test_query_decodes_through_aliases() {
        let db = memory_db(DialectOptions::sqlite());
        let fields = vec![
            FieldDef::new("itemId", FieldType::Integer),
            FieldDef::new("isOpen", FieldType::Boolean),
            FieldDef::new("note", FieldType::String),
        ];
        db.add_default_aliases("items", &fields);
        let scope = StatementScope::new("items", "primary");
        let insert = db.compile(
            &scope,
            true,
            "iItem",
            &fields,
            "INSERT INTO t:Item (c:itemId, c:isOpen, c:note) VALUES (:itemId, :isOpen, :note)",
        );
        let select = db.compile(
            &scope,
            true,
            "qItem",
            &fields,
            "SELECT * FROM t:Item WHERE c:itemId = :itemId",
        );

        let mut session = db.session().await.expect("acquire should succeed");
        db.execute_schema_change(
            &mut session,
            "item",
            "CREATE TABLE item (item_id bigint, is_open boolean, note varchar)",
        )
        .await
        .expect("ddl should succeed");
        let row = Record::new().with("itemId", 7).with("isOpen", true);
        db.insert_statement(&mut session, &insert, &row)
            .await
            .expect("insert should succeed");

        let found = db
            .query_one_statement(&mut session, &select, &Record::new().with("itemId", 7))
            .await
            .expect("query should succeed")
            .expect("row should exist");
        assert_eq!(found.get_i64("itemId"), Some(7));
        assert_eq!(found.get_bool("isOpen"), Some(true));
        assert!(!found.contains_key("note"));
    }

    #[tokio::test]
    async fn test_schema_change_failure_names_table() {
        let db = memory_db(DialectOptions::sqlite());
        let mut session = db.session().await.expect("acquire should succeed");
        let err = db
            .execute_schema_change(&mut session, "broken", "CREATE TABLE (")
            .await
            .unwrap_err();
        assert!(matches!(err, SqlError::SchemaChange { ref table, .. } if table == "broken"));
    }
}
