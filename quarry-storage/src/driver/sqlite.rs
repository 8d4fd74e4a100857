//! SQLite driver
//!
//! `rusqlite` is synchronous, so every call moves onto the blocking pool with
//! the connection behind a mutex. Prepared statements live in the
//! connection's statement cache and are looked up by SQL text.
//!
//! In-memory databases use a shared-cache URI that is unique per database,
//! plus an anchor connection that keeps the data alive while no session
//! holds a connection open.

use super::{IndexInfo, PreparedHandle, RawRow};
use quarry_core::value::format_timestamp;
use quarry_core::{SqlError, SqlValue};
use rusqlite::types::{Value as LiteValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a writer waits on a locked database before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

const STATEMENT_CACHE_CAPACITY: usize = 256;

/// Where a SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    File(PathBuf),
    /// A `file:` URI with `mode=memory&cache=shared`.
    Memory(String),
}

// ============================================================================
// CONNECTOR
// ============================================================================

#[derive(Debug, Clone)]
pub struct SqliteConnector {
    database: Arc<str>,
    target: SqliteTarget,
    anchor: Option<Arc<Mutex<Connection>>>,
}

impl SqliteConnector {
    pub fn file(database: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            database: Arc::from(database),
            target: SqliteTarget::File(path.into()),
            anchor: None,
        }
    }

    /// A private in-memory database. The anchor connection is opened here so
    /// the database exists before the first session asks for it.
    pub fn memory(database: &str, key: &str) -> Result<Self, SqlError> {
        let uri = format!(
            "file:quarry-{}-{}?mode=memory&cache=shared",
            sanitize(key),
            uuid::Uuid::now_v7().simple()
        );
        let target = SqliteTarget::Memory(uri);
        let anchor = open(&target).map_err(|e| SqlError::Connection {
            database: database.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            database: Arc::from(database),
            target,
            anchor: Some(Arc::new(Mutex::new(anchor))),
        })
    }

    pub fn target(&self) -> &SqliteTarget {
        &self.target
    }

    pub fn is_memory(&self) -> bool {
        self.anchor.is_some()
    }

    pub async fn connect(&self) -> Result<SqliteConnection, SqlError> {
        let target = self.target.clone();
        let database = Arc::clone(&self.database);
        let conn = tokio::task::spawn_blocking(move || open(&target))
            .await
            .map_err(|e| SqlError::Connection {
                database: database.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| SqlError::Connection {
                database: database.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(database = %database, "Opened SQLite connection");
        Ok(SqliteConnection {
            conn: Arc::new(Mutex::new(conn)),
            database,
        })
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn open(target: &SqliteTarget) -> rusqlite::Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = match target {
        SqliteTarget::File(path) => Connection::open_with_flags(path, flags)?,
        SqliteTarget::Memory(uri) => Connection::open_with_flags(uri, flags)?,
    };
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if let SqliteTarget::File(_) = target {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
    Ok(conn)
}

// ============================================================================
// CONNECTION
// ============================================================================

pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
    database: Arc<str>,
}

impl SqliteConnection {
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, statement: &str, f: F) -> Result<T, SqlError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str, &str) -> Result<T, SqlError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let database = Arc::clone(&self.database);
        let statement = statement.to_string();
        let lost = |database: &str, statement: &str, reason: String| SqlError::ConnectionLost {
            database: database.to_string(),
            statement: statement.to_string(),
            reason,
        };
        let (database_err, statement_err) = (Arc::clone(&database), statement.clone());
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| lost(&database, &statement, "connection mutex poisoned".to_string()))?;
            f(&mut guard, &database, &statement)
        })
        .await
        .map_err(|e| lost(&database_err, &statement_err, e.to_string()))?
    }

    /// Compile once so syntax errors surface at prepare time; the compiled
    /// form stays in the connection's statement cache.
    pub async fn prepare(&mut self, name: &str, sql: &str) -> Result<PreparedHandle, SqlError> {
        let sql: Arc<str> = Arc::from(sql);
        let text = Arc::clone(&sql);
        self.with_conn(name, move |conn, database, statement| {
            conn.prepare_cached(&text)
                .map(|_| ())
                .map_err(|e| map_error(database, statement, e))
        })
        .await?;
        Ok(PreparedHandle::Sqlite(sql))
    }

    pub async fn execute(
        &mut self,
        name: &str,
        sql: &Arc<str>,
        params: Vec<SqlValue>,
    ) -> Result<u64, SqlError> {
        let sql = Arc::clone(sql);
        self.with_conn(name, move |conn, database, statement| {
            let mut stmt = conn
                .prepare_cached(&sql)
                .map_err(|e| map_error(database, statement, e))?;
            let values: Vec<LiteValue> = params.into_iter().map(to_lite).collect();
            let changed = stmt
                .execute(params_from_iter(values))
                .map_err(|e| map_error(database, statement, e))?;
            Ok(changed as u64)
        })
        .await
    }

    pub async fn query(
        &mut self,
        name: &str,
        sql: &Arc<str>,
        params: Vec<SqlValue>,
        max_rows: usize,
    ) -> Result<Vec<RawRow>, SqlError> {
        let sql = Arc::clone(sql);
        self.with_conn(name, move |conn, database, statement| {
            let err = |e| map_error(database, statement, e);
            let mut stmt = conn.prepare_cached(&sql).map_err(err)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let values: Vec<LiteValue> = params.into_iter().map(to_lite).collect();
            let mut rows = stmt.query(params_from_iter(values)).map_err(err)?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(err)? {
                if out.len() >= max_rows {
                    break;
                }
                let mut raw = Vec::with_capacity(columns.len());
                for (i, column) in columns.iter().enumerate() {
                    let value = match row.get_ref(i).map_err(err)? {
                        ValueRef::Null => SqlValue::Null,
                        ValueRef::Integer(v) => SqlValue::Int(v),
                        ValueRef::Real(v) => SqlValue::Real(v),
                        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
                        ValueRef::Blob(b) => SqlValue::Bytes(b.to_vec()),
                    };
                    raw.push((column.clone(), value));
                }
                out.push(raw);
            }
            Ok(out)
        })
        .await
    }

    pub async fn batch(&mut self, label: &str, sql: &str) -> Result<(), SqlError> {
        let sql = sql.to_string();
        self.with_conn(label, move |conn, database, statement| {
            conn.execute_batch(&sql)
                .map_err(|e| map_error(database, statement, e))
        })
        .await
    }

    pub async fn table_columns(&mut self, table: &str) -> Result<Vec<String>, SqlError> {
        let table = table.to_string();
        self.with_conn("tableColumns", move |conn, database, statement| {
            let err = |e| map_error(database, statement, e);
            let mut stmt = conn
                .prepare_cached("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
                .map_err(err)?;
            let names = stmt
                .query_map([&table], |row| row.get::<_, String>(0))
                .map_err(err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(err)?;
            Ok(names)
        })
        .await
    }

    pub async fn table_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, SqlError> {
        let table = table.to_string();
        self.with_conn("tableIndexes", move |conn, database, statement| {
            let err = |e| map_error(database, statement, e);
            let mut list = conn
                .prepare_cached("SELECT name, \"unique\" FROM pragma_index_list(?1)")
                .map_err(err)?;
            let listed = list
                .query_map([&table], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
                })
                .map_err(err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(err)?;

            let mut indexes = Vec::with_capacity(listed.len());
            let mut stmt = conn
                .prepare_cached("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
                .map_err(err)?;
            for (name, unique) in listed {
                let columns = stmt
                    .query_map([&name], |row| row.get::<_, String>(0))
                    .map_err(err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(err)?;
                indexes.push(IndexInfo {
                    name,
                    columns,
                    unique,
                });
            }
            Ok(indexes)
        })
        .await
    }
}

fn to_lite(value: SqlValue) -> LiteValue {
    match value {
        SqlValue::Null => LiteValue::Null,
        SqlValue::Text(s) => LiteValue::Text(s),
        SqlValue::Int(i) => LiteValue::Integer(i),
        SqlValue::Real(f) => LiteValue::Real(f),
        SqlValue::Bool(b) => LiteValue::Integer(i64::from(b)),
        SqlValue::Timestamp(ts) => LiteValue::Text(format_timestamp(&ts)),
        SqlValue::Bytes(b) => LiteValue::Blob(b),
    }
}

pub(crate) fn map_error(database: &str, statement: &str, err: rusqlite::Error) -> SqlError {
    let constraint_violation = matches!(
        &err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    );
    SqlError::Io {
        database: database.to_string(),
        statement: statement.to_string(),
        reason: err.to_string(),
        constraint_violation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_databases_are_isolated() {
        let a = SqliteConnector::memory("a", "shard").expect("open should succeed");
        let b = SqliteConnector::memory("b", "shard").expect("open should succeed");
        assert_ne!(a.target(), b.target());

        let mut ca = a.connect().await.expect("connect should succeed");
        ca.batch("ddl", "CREATE TABLE t (id integer)")
            .await
            .expect("ddl should succeed");
        let mut cb = b.connect().await.expect("connect should succeed");
        let cols = cb.table_columns("t").await.expect("metadata should succeed");
        assert!(cols.is_empty());
    }

    #[tokio::test]
    async fn test_constraint_violation_is_flagged() {
        let connector = SqliteConnector::memory("c", "primary").expect("open should succeed");
        let mut conn = connector.connect().await.expect("connect should succeed");
        conn.batch("ddl", "CREATE TABLE t (id integer PRIMARY KEY)")
            .await
            .expect("ddl should succeed");
        let handle = conn
            .prepare("ins", "INSERT INTO t (id) VALUES (?)")
            .await
            .expect("prepare should succeed");
        let PreparedHandle::Sqlite(sql) = handle else {
            panic!("expected a SQLite handle");
        };
        conn.execute("ins", &sql, vec![SqlValue::Int(1)])
            .await
            .expect("first insert should succeed");
        let err = conn
            .execute("ins", &sql, vec![SqlValue::Int(1)])
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[tokio::test]
    async fn test_query_respects_row_cap_and_types() {
        let connector = SqliteConnector::memory("q", "primary").expect("open should succeed");
        let mut conn = connector.connect().await.expect("connect should succeed");
        conn.batch(
            "ddl",
            "CREATE TABLE t (id integer, name varchar); \
             INSERT INTO t VALUES (1, 'a'), (2, NULL), (3, 'c');",
        )
        .await
        .expect("ddl should succeed");
        let sql: Arc<str> = Arc::from("SELECT id, name FROM t ORDER BY id");
        let rows = conn
            .query("q", &sql, vec![], 2)
            .await
            .expect("query should succeed");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], ("id".to_string(), SqlValue::Int(1)));
        assert_eq!(rows[1][1], ("name".to_string(), SqlValue::Null));
    }

    #[tokio::test]
    async fn test_index_metadata() {
        let connector = SqliteConnector::memory("i", "primary").expect("open should succeed");
        let mut conn = connector.connect().await.expect("connect should succeed");
        conn.batch(
            "ddl",
            "CREATE TABLE t (a integer, b integer); CREATE UNIQUE INDEX idx_t_ab ON t (a, b);",
        )
        .await
        .expect("ddl should succeed");
        let indexes = conn.table_indexes("t").await.expect("metadata should succeed");
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].signature(), "a:b");
        assert!(indexes[0].unique);
    }
}
