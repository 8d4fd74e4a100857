//! Session pool
//!
//! A fixed number of sessions per database, handed out behind a semaphore.
//! A session opens its connection lazily and keeps a cache of prepared
//! statements for it; losing the connection drops the cache with it.

use crate::driver::{Connector, NativeConnection, PreparedHandle, RawRow};
use quarry_core::{QuarryResult, Record, SqlError};
use quarry_sql::CompiledStatement;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// How long `acquire` waits for a free session.
pub const POOL_WAIT: Duration = Duration::from_secs(2);

/// Upper bound on rows collected by a single query.
pub const MAX_ROWS: usize = 100_000;

// ============================================================================
// SESSION
// ============================================================================

/// One pooled slot: an optional live connection and its statement cache.
#[derive(Default)]
pub struct Session {
    id: usize,
    connection: Option<NativeConnection>,
    statements: HashMap<String, PreparedHandle>,
    in_transaction: bool,
}

impl Session {
    fn new(id: usize) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

// ============================================================================
// POOL
// ============================================================================

pub struct SessionPool {
    database: String,
    connector: Connector,
    sessions: Mutex<Vec<Session>>,
    permits: Arc<Semaphore>,
    size: usize,
    wait: Duration,
    live: AtomicUsize,
}

impl SessionPool {
    pub fn new(database: impl Into<String>, connector: Connector, size: usize) -> Self {
        Self::with_wait(database, connector, size, POOL_WAIT)
    }

    pub fn with_wait(
        database: impl Into<String>,
        connector: Connector,
        size: usize,
        wait: Duration,
    ) -> Self {
        let size = size.max(1);
        Self {
            database: database.into(),
            connector,
            sessions: Mutex::new((0..size).rev().map(Session::new).collect()),
            permits: Arc::new(Semaphore::new(size)),
            size,
            wait,
            live: AtomicUsize::new(0),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Sessions not currently handed out.
    pub fn idle(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Open connections across all sessions. Never exceeds `size`.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Take a session, waiting up to the pool's wait time for one to free up.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledSession, SqlError> {
        let permit = match tokio::time::timeout(self.wait, Arc::clone(&self.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(SqlError::Connection {
                    database: self.database.clone(),
                    reason: "session pool is closed".to_string(),
                })
            }
            Err(_) => {
                warn!(database = %self.database, size = self.size, "Timed out waiting for a session");
                return Err(SqlError::PoolTimeout {
                    database: self.database.clone(),
                    waited_ms: self.wait.as_millis() as u64,
                });
            }
        };

        let session = self.lock_sessions().pop().ok_or_else(|| SqlError::Connection {
            database: self.database.clone(),
            reason: "permit granted with no idle session".to_string(),
        })?;
        Ok(PooledSession {
            pool: Arc::clone(self),
            session,
            _permit: permit,
        })
    }

    fn lock_sessions(&self) -> MutexGuard<'_, Vec<Session>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn release(&self, session: Session) {
        self.lock_sessions().push(session);
    }
}

// ============================================================================
// POOLED SESSION
// ============================================================================

/// A session checked out of the pool. Returned on drop.
pub struct PooledSession {
    pool: Arc<SessionPool>,
    session: Session,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub fn database(&self) -> &str {
        &self.pool.database
    }

    pub fn id(&self) -> usize {
        self.session.id
    }

    pub fn in_transaction(&self) -> bool {
        self.session.in_transaction
    }

    pub fn has_connection(&self) -> bool {
        self.session.connection.is_some()
    }

    pub fn cached_statements(&self) -> usize {
        self.session.statements.len()
    }

    /// The live connection, opening one if the session has none.
    pub async fn connection(&mut self) -> Result<&mut NativeConnection, SqlError> {
        if self.session.connection.is_none() {
            let conn = self.pool.connector.connect().await?;
            self.session.statements.clear();
            self.session.connection = Some(conn);
            self.pool.live.fetch_add(1, Ordering::SeqCst);
            debug!(database = %self.pool.database, session = self.session.id, "Session connected");
        }
        self.session
            .connection
            .as_mut()
            .ok_or_else(|| SqlError::Connection {
                database: self.pool.database.clone(),
                reason: "connection missing after open".to_string(),
            })
    }

    /// Drop the connection and its statement cache. The next use reconnects.
    pub fn set_invalid(&mut self) {
        if self.session.connection.take().is_some() {
            self.pool.live.fetch_sub(1, Ordering::SeqCst);
        }
        self.session.statements.clear();
        self.session.in_transaction = false;
    }

    /// Cached handle for `stmt`, preparing it on first use by this connection.
    pub async fn check_and_get_statement(
        &mut self,
        stmt: &CompiledStatement,
    ) -> Result<PreparedHandle, SqlError> {
        let key = stmt.session_key();
        if self.session.connection.is_some() {
            if let Some(handle) = self.session.statements.get(&key) {
                return Ok(handle.clone());
            }
        }
        let conn = self.connection().await?;
        let prepared = conn.prepare(&stmt.name, &stmt.sql).await;
        let handle = self.track(prepared)?;
        self.session.statements.insert(key, handle.clone());
        Ok(handle)
    }

    /// Run a statement that returns no rows.
    pub async fn execute(&mut self, stmt: &CompiledStatement, params: &Record) -> QuarryResult<u64> {
        let values = stmt.bind(params)?;
        let handle = self.check_and_get_statement(stmt).await?;
        debug!(statement = %stmt.name, "Executing statement");
        let conn = self.connection().await?;
        let result = conn.execute(&stmt.name, &handle, values).await;
        Ok(self.track(result)?)
    }

    /// Run a statement and return its raw rows.
    pub async fn query(
        &mut self,
        stmt: &CompiledStatement,
        params: &Record,
    ) -> QuarryResult<Vec<RawRow>> {
        let values = stmt.bind(params)?;
        let handle = self.check_and_get_statement(stmt).await?;
        debug!(statement = %stmt.name, "Querying statement");
        let conn = self.connection().await?;
        let result = conn.query(&stmt.name, &handle, values, MAX_ROWS).await;
        Ok(self.track(result)?)
    }

    /// Run unparameterized SQL, such as DDL.
    pub async fn batch(&mut self, label: &str, sql: &str) -> Result<(), SqlError> {
        let conn = self.connection().await?;
        let result = conn.batch(label, sql).await;
        self.track(result)
    }

    pub async fn table_columns(&mut self, table: &str) -> Result<Vec<String>, SqlError> {
        let conn = self.connection().await?;
        let result = conn.table_columns(table).await;
        self.track(result)
    }

    pub async fn table_indexes(
        &mut self,
        table: &str,
    ) -> Result<Vec<crate::driver::IndexInfo>, SqlError> {
        let conn = self.connection().await?;
        let result = conn.table_indexes(table).await;
        self.track(result)
    }

    pub async fn begin(&mut self) -> Result<(), SqlError> {
        let conn = self.connection().await?;
        let sql = conn.begin_sql();
        let result = conn.batch("BEGIN", sql).await;
        self.track(result)?;
        self.session.in_transaction = true;
        Ok(())
    }

    /// Commit the open transaction. A failed commit is rolled back so the
    /// session is never returned mid-transaction.
    pub async fn commit(&mut self) -> Result<(), SqlError> {
        let conn = self.connection().await?;
        let result = conn.batch("COMMIT", "COMMIT").await;
        match self.track(result) {
            Ok(()) => {
                self.session.in_transaction = false;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback().await {
                    warn!(error = %rollback, "Rollback after failed commit also failed");
                }
                Err(e)
            }
        }
    }

    pub async fn rollback(&mut self) -> Result<(), SqlError> {
        if !self.session.in_transaction {
            return Ok(());
        }
        let conn = self.connection().await?;
        let result = conn.batch("ROLLBACK", "ROLLBACK").await;
        self.session.in_transaction = false;
        if result.is_err() {
            // The transaction state is unknown; start over on a fresh connection.
            self.set_invalid();
        }
        self.track(result)
    }

    fn track<T>(&mut self, result: Result<T, SqlError>) -> Result<T, SqlError> {
        if let Err(e) = &result {
            if e.breaks_connection() {
                warn!(database = %self.pool.database, session = self.session.id, error = %e, "Dropping broken connection");
                self.set_invalid();
            }
        }
        result
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let mut session = std::mem::take(&mut self.session);
        if session.in_transaction {
            warn!(database = %self.pool.database, session = session.id, "Session returned inside a transaction; dropping connection");
            if session.connection.take().is_some() {
                self.pool.live.fetch_sub(1, Ordering::SeqCst);
            }
            session.statements.clear();
            session.in_transaction = false;
        }
        self.pool.release(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteConnector;
    use quarry_core::{FieldDef, FieldType};
    use quarry_sql::{compile, Resolver, StatementScope};

    struct Plain;

    impl Resolver for Plain {
        fn table_name(&self, table: &str) -> String {
            table.to_string()
        }

        fn column_name(&self, field: &str) -> String {
            field.to_string()
        }

        fn reserved_fields(&self) -> &[FieldDef] {
            &[]
        }
    }

    fn memory_pool(size: usize, wait: Duration) -> Arc<SessionPool> {
        let connector = SqliteConnector::memory("test", "primary").expect("open should succeed");
        Arc::new(SessionPool::with_wait(
            "test",
            Connector::Sqlite(connector),
            size,
            wait,
        ))
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = memory_pool(1, Duration::from_millis(50));
        let held = pool.acquire().await.expect("first acquire should succeed");
        let err = pool.acquire().await.err().expect("second acquire should time out");
        assert!(matches!(err, SqlError::PoolTimeout { waited_ms: 50, .. }));
        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_connections_open_lazily_and_stay_bounded() {
        let pool = memory_pool(2, POOL_WAIT);
        let mut a = pool.acquire().await.expect("acquire should succeed");
        let mut b = pool.acquire().await.expect("acquire should succeed");
        assert_eq!(pool.live_connections(), 0);
        assert!(!a.has_connection());

        a.batch("ddl", "CREATE TABLE t (id integer)").await.expect("ddl should succeed");
        b.table_columns("t").await.expect("metadata should succeed");
        assert_eq!(pool.live_connections(), 2);
        assert!(pool.live_connections() <= pool.size());
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test]
    async fn test_statement_cache_cleared_on_invalidate() {
        let pool = memory_pool(1, POOL_WAIT);
        let mut session = pool.acquire().await.expect("acquire should succeed");
        session
            .batch("ddl", "CREATE TABLE t (id integer, name varchar)")
            .await
            .expect("ddl should succeed");

        let fields = vec![
            FieldDef::new("id", FieldType::Integer),
            FieldDef::new("name", FieldType::String),
        ];
        let stmt = compile(
            &Plain,
            &StatementScope::new("t", "primary"),
            "iT",
            &fields,
            "INSERT INTO t:t (c:id, c:name) VALUES (:id, :name)",
        );
        let row = Record::new().with("id", 1).with("name", "a");
        session.execute(&stmt, &row).await.expect("insert should succeed");
        assert_eq!(session.cached_statements(), 1);

        session.set_invalid();
        assert_eq!(session.cached_statements(), 0);
        assert_eq!(pool.live_connections(), 0);

        session.execute(&stmt, &row.clone().with("id", 2)).await.expect("insert should succeed");
        assert_eq!(session.cached_statements(), 1);
    }

    #[tokio::test]
    async fn test_session_returned_mid_transaction_is_reset() {
        let pool = memory_pool(1, POOL_WAIT);
        {
            let mut session = pool.acquire().await.expect("acquire should succeed");
            session.begin().await.expect("begin should succeed");
            assert!(session.in_transaction());
        }
        assert_eq!(pool.live_connections(), 0);
        let session = pool.acquire().await.expect("acquire should succeed");
        assert!(!session.in_transaction());
        assert!(!session.has_connection());
    }
}
