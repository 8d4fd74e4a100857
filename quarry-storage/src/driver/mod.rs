//! Native database drivers
//!
//! Two engines sit behind one enum: PostgreSQL through `tokio-postgres`
//! and SQLite through `rusqlite` on the blocking pool. Everything above
//! this module talks to [`NativeConnection`] and never to a driver type.

pub mod postgres;
pub mod sqlite;

use quarry_core::{DbEngine, SqlError, SqlValue};
use std::sync::Arc;

pub use self::postgres::{PgConnection, PgConnector};
pub use self::sqlite::{SqliteConnection, SqliteConnector, SqliteTarget};

/// One result row: column name and value pairs in select order.
pub type RawRow = Vec<(String, SqlValue)>;

/// Index metadata reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    /// Column names in index order.
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexInfo {
    /// Lower-cased columns joined with `:`, used to detect existing indexes.
    pub fn signature(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// A statement prepared on a specific connection.
#[derive(Debug, Clone)]
pub enum PreparedHandle {
    Postgres(tokio_postgres::Statement),
    /// SQLite keeps prepared statements in the connection's own cache,
    /// keyed by SQL text.
    Sqlite(Arc<str>),
}

/// Opens connections for one logical database.
#[derive(Debug, Clone)]
pub enum Connector {
    Postgres(PgConnector),
    Sqlite(SqliteConnector),
}

impl Connector {
    pub fn engine(&self) -> DbEngine {
        match self {
            Connector::Postgres(_) => DbEngine::Postgres,
            Connector::Sqlite(_) => DbEngine::Sqlite,
        }
    }

    pub async fn connect(&self) -> Result<NativeConnection, SqlError> {
        match self {
            Connector::Postgres(c) => c.connect().await.map(NativeConnection::Postgres),
            Connector::Sqlite(c) => c.connect().await.map(NativeConnection::Sqlite),
        }
    }
}

/// A live connection to either engine.
pub enum NativeConnection {
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

impl NativeConnection {
    /// Statement that opens a transaction holding the write lock from the start.
    pub fn begin_sql(&self) -> &'static str {
        match self {
            NativeConnection::Postgres(_) => "BEGIN",
            NativeConnection::Sqlite(_) => "BEGIN IMMEDIATE",
        }
    }

    pub async fn prepare(&mut self, name: &str, sql: &str) -> Result<PreparedHandle, SqlError> {
        match self {
            NativeConnection::Postgres(c) => c.prepare(name, sql).await,
            NativeConnection::Sqlite(c) => c.prepare(name, sql).await,
        }
    }

    /// Run a statement that returns no rows. Returns the affected row count.
    pub async fn execute(
        &mut self,
        name: &str,
        handle: &PreparedHandle,
        params: Vec<SqlValue>,
    ) -> Result<u64, SqlError> {
        match (self, handle) {
            (NativeConnection::Postgres(c), PreparedHandle::Postgres(stmt)) => {
                c.execute(name, stmt, params).await
            }
            (NativeConnection::Sqlite(c), PreparedHandle::Sqlite(sql)) => {
                c.execute(name, sql, params).await
            }
            (conn, _) => Err(mismatched_handle(conn, name)),
        }
    }

    /// Run a statement and collect at most `max_rows` rows.
    pub async fn query(
        &mut self,
        name: &str,
        handle: &PreparedHandle,
        params: Vec<SqlValue>,
        max_rows: usize,
    ) -> Result<Vec<RawRow>, SqlError> {
        match (self, handle) {
            (NativeConnection::Postgres(c), PreparedHandle::Postgres(stmt)) => {
                c.query(name, stmt, params, max_rows).await
            }
            (NativeConnection::Sqlite(c), PreparedHandle::Sqlite(sql)) => {
                c.query(name, sql, params, max_rows).await
            }
            (conn, _) => Err(mismatched_handle(conn, name)),
        }
    }

    /// Run one or more unparameterized statements.
    pub async fn batch(&mut self, label: &str, sql: &str) -> Result<(), SqlError> {
        match self {
            NativeConnection::Postgres(c) => c.batch(label, sql).await,
            NativeConnection::Sqlite(c) => c.batch(label, sql).await,
        }
    }

    /// Column names of `table`, empty when the table does not exist.
    pub async fn table_columns(&mut self, table: &str) -> Result<Vec<String>, SqlError> {
        match self {
            NativeConnection::Postgres(c) => c.table_columns(table).await,
            NativeConnection::Sqlite(c) => c.table_columns(table).await,
        }
    }

    pub async fn table_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, SqlError> {
        match self {
            NativeConnection::Postgres(c) => c.table_indexes(table).await,
            NativeConnection::Sqlite(c) => c.table_indexes(table).await,
        }
    }

    fn database(&self) -> &str {
        match self {
            NativeConnection::Postgres(c) => c.database(),
            NativeConnection::Sqlite(c) => c.database(),
        }
    }
}

fn mismatched_handle(conn: &NativeConnection, statement: &str) -> SqlError {
    SqlError::Io {
        database: conn.database().to_string(),
        statement: statement.to_string(),
        reason: "statement was prepared for a different engine".to_string(),
        constraint_violation: false,
    }
}
