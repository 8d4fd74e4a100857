//! PostgreSQL driver
//!
//! Each connection owns a `tokio_postgres::Client`; the connection future is
//! spawned onto the runtime and ends when the client is dropped. Parameters
//! are converted against the types the server inferred for the prepared
//! statement, so a bound integer can land in an `int4` or `int8` column
//! without a cast in the template.

use super::{IndexInfo, PreparedHandle, RawRow};
use chrono::{DateTime, NaiveDateTime, Utc};
use postgres_types::{ToSql, Type};
use quarry_core::types::parse_timestamp;
use quarry_core::value::format_timestamp;
use quarry_core::{SqlError, SqlValue};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::{Client, Config, NoTls, Row, Statement};

/// Server-side limit applied to every statement on a Quarry connection.
pub const STATEMENT_TIMEOUT_MS: u64 = 60_000;

const COLUMNS_SQL: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name::text = $1::text \
     ORDER BY ordinal_position";

const INDEXES_SQL: &str = "SELECT i.relname::text, a.attname::text, ix.indisunique \
     FROM pg_class t \
     JOIN pg_index ix ON t.oid = ix.indrelid \
     JOIN pg_class i ON i.oid = ix.indexrelid \
     JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) ON true \
     JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
     WHERE t.relname::text = $1::text AND t.relkind = 'r' AND pg_table_is_visible(t.oid) \
     ORDER BY i.relname, k.ord";

// ============================================================================
// CONNECTOR
// ============================================================================

/// Connection settings for one PostgreSQL database entry.
#[derive(Debug, Clone)]
pub struct PgConnector {
    database: Arc<str>,
    config: Config,
}

impl PgConnector {
    pub fn new(
        database: &str,
        host: &str,
        port: u16,
        dbname: &str,
        user: &str,
        password: Option<&str>,
        connect_timeout: Duration,
    ) -> Self {
        let mut config = Config::new();
        config
            .host(host)
            .port(port)
            .dbname(dbname)
            .user(user)
            .application_name("quarry")
            .connect_timeout(connect_timeout);
        if let Some(password) = password {
            config.password(password);
        }
        Self {
            database: Arc::from(database),
            config,
        }
    }

    pub async fn connect(&self) -> Result<PgConnection, SqlError> {
        let (client, connection) =
            self.config
                .connect(NoTls)
                .await
                .map_err(|e| SqlError::Connection {
                    database: self.database.to_string(),
                    reason: e.to_string(),
                })?;

        let database = Arc::clone(&self.database);
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(database = %database, error = %e, "PostgreSQL connection closed with error");
            }
        });

        client
            .batch_execute(&format!("SET statement_timeout = {}", STATEMENT_TIMEOUT_MS))
            .await
            .map_err(|e| SqlError::Connection {
                database: self.database.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(database = %self.database, "Opened PostgreSQL connection");
        Ok(PgConnection {
            client,
            database: Arc::clone(&self.database),
        })
    }
}

// ============================================================================
// CONNECTION
// ============================================================================

pub struct PgConnection {
    client: Client,
    database: Arc<str>,
}

impl PgConnection {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn prepare(&mut self, name: &str, sql: &str) -> Result<PreparedHandle, SqlError> {
        self.client
            .prepare(sql)
            .await
            .map(PreparedHandle::Postgres)
            .map_err(|e| self.map_error(name, e))
    }

    pub async fn execute(
        &mut self,
        name: &str,
        stmt: &Statement,
        params: Vec<SqlValue>,
    ) -> Result<u64, SqlError> {
        let boxed = self.encode_params(name, stmt, params)?;
        let refs = param_refs(&boxed);
        self.client
            .execute(stmt, &refs)
            .await
            .map_err(|e| self.map_error(name, e))
    }

    pub async fn query(
        &mut self,
        name: &str,
        stmt: &Statement,
        params: Vec<SqlValue>,
        max_rows: usize,
    ) -> Result<Vec<RawRow>, SqlError> {
        let boxed = self.encode_params(name, stmt, params)?;
        let refs = param_refs(&boxed);
        let rows = self
            .client
            .query(stmt, &refs)
            .await
            .map_err(|e| self.map_error(name, e))?;
        rows.iter()
            .take(max_rows)
            .map(|row| decode_row(row).map_err(|e| self.map_error(name, e)))
            .collect()
    }

    pub async fn batch(&mut self, label: &str, sql: &str) -> Result<(), SqlError> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| self.map_error(label, e))
    }

    pub async fn table_columns(&mut self, table: &str) -> Result<Vec<String>, SqlError> {
        let rows = self
            .client
            .query(COLUMNS_SQL, &[&table])
            .await
            .map_err(|e| self.map_error("tableColumns", e))?;
        rows.iter()
            .map(|r| r.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.map_error("tableColumns", e))
    }

    pub async fn table_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, SqlError> {
        let rows = self
            .client
            .query(INDEXES_SQL, &[&table])
            .await
            .map_err(|e| self.map_error("tableIndexes", e))?;

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in &rows {
            let (name, column, unique) =
                index_row(row).map_err(|e| self.map_error("tableIndexes", e))?;
            match indexes.last_mut() {
                Some(last) if last.name == name => last.columns.push(column),
                _ => indexes.push(IndexInfo {
                    name,
                    columns: vec![column],
                    unique,
                }),
            }
        }
        Ok(indexes)
    }

    fn encode_params(
        &self,
        name: &str,
        stmt: &Statement,
        params: Vec<SqlValue>,
    ) -> Result<Vec<Box<dyn ToSql + Sync + Send>>, SqlError> {
        let types = stmt.params();
        if types.len() != params.len() {
            return Err(self.io_error(
                name,
                format!(
                    "statement expects {} parameters, {} bound",
                    types.len(),
                    params.len()
                ),
            ));
        }
        params
            .into_iter()
            .zip(types)
            .enumerate()
            .map(|(i, (value, ty))| {
                pg_param(value, ty)
                    .map_err(|reason| self.io_error(name, format!("parameter ${}: {}", i + 1, reason)))
            })
            .collect()
    }

    fn io_error(&self, statement: &str, reason: String) -> SqlError {
        SqlError::Io {
            database: self.database.to_string(),
            statement: statement.to_string(),
            reason,
            constraint_violation: false,
        }
    }

    fn map_error(&self, statement: &str, err: tokio_postgres::Error) -> SqlError {
        map_error(&self.database, statement, err)
    }
}

fn index_row(row: &Row) -> Result<(String, String, bool), tokio_postgres::Error> {
    Ok((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?))
}

fn param_refs(boxed: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Classify a driver error. SQLSTATE class 23 is an integrity constraint
/// violation; socket-level failures poison the connection.
pub(crate) fn map_error(database: &str, statement: &str, err: tokio_postgres::Error) -> SqlError {
    if let Some(db) = err.as_db_error() {
        let reason = match db.detail() {
            Some(detail) => format!("{} ({})", db.message(), detail),
            None => db.message().to_string(),
        };
        return SqlError::Io {
            database: database.to_string(),
            statement: statement.to_string(),
            reason,
            constraint_violation: db.code().code().starts_with("23"),
        };
    }

    let io_source = std::error::Error::source(&err)
        .map(|s| s.downcast_ref::<std::io::Error>().is_some())
        .unwrap_or(false);
    if err.is_closed() || io_source {
        tracing::warn!(database, statement, error = %err, "PostgreSQL connection lost");
        return SqlError::ConnectionLost {
            database: database.to_string(),
            statement: statement.to_string(),
            reason: err.to_string(),
        };
    }

    SqlError::Io {
        database: database.to_string(),
        statement: statement.to_string(),
        reason: err.to_string(),
        constraint_violation: false,
    }
}

// ============================================================================
// PARAMETER ENCODING
// ============================================================================

/// Convert a value to the Rust type the server expects for `ty`.
fn pg_param(value: SqlValue, ty: &Type) -> Result<Box<dyn ToSql + Sync + Send>, String> {
    if *ty == Type::BOOL {
        let v = match value {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b),
            SqlValue::Int(i) => Some(i != 0),
            SqlValue::Text(s) => Some(matches!(s.as_str(), "true" | "t" | "1")),
            other => return Err(mismatch(&other, ty)),
        };
        return Ok(Box::new(v));
    }
    if *ty == Type::INT2 {
        let v = as_i64(value, ty)?
            .map(i16::try_from)
            .transpose()
            .map_err(|e| e.to_string())?;
        return Ok(Box::new(v));
    }
    if *ty == Type::INT4 {
        let v = as_i64(value, ty)?
            .map(i32::try_from)
            .transpose()
            .map_err(|e| e.to_string())?;
        return Ok(Box::new(v));
    }
    if *ty == Type::INT8 {
        return Ok(Box::new(as_i64(value, ty)?));
    }
    if *ty == Type::FLOAT4 {
        return Ok(Box::new(as_f64(value, ty)?.map(|f| f as f32)));
    }
    if *ty == Type::FLOAT8 {
        return Ok(Box::new(as_f64(value, ty)?));
    }
    if *ty == Type::TIMESTAMPTZ {
        return Ok(Box::new(as_timestamp(value, ty)?));
    }
    if *ty == Type::TIMESTAMP {
        return Ok(Box::new(as_timestamp(value, ty)?.map(|ts| ts.naive_utc())));
    }
    if *ty == Type::BYTEA {
        let v = match value {
            SqlValue::Null => None,
            SqlValue::Bytes(b) => Some(b),
            SqlValue::Text(s) => Some(s.into_bytes()),
            other => return Err(mismatch(&other, ty)),
        };
        return Ok(Box::new(v));
    }
    if *ty == Type::JSON || *ty == Type::JSONB {
        let v = match as_text(value) {
            None => None,
            Some(s) => Some(
                serde_json::from_str::<serde_json::Value>(&s).map_err(|e| e.to_string())?,
            ),
        };
        return Ok(Box::new(v));
    }
    if *ty == Type::UUID {
        let v = match as_text(value) {
            None => None,
            Some(s) => Some(uuid::Uuid::parse_str(&s).map_err(|e| e.to_string())?),
        };
        return Ok(Box::new(v));
    }
    Ok(Box::new(as_text(value)))
}

fn mismatch(value: &SqlValue, ty: &Type) -> String {
    format!("cannot bind {:?} as {}", value, ty.name())
}

fn as_i64(value: SqlValue, ty: &Type) -> Result<Option<i64>, String> {
    match value {
        SqlValue::Null => Ok(None),
        SqlValue::Int(i) => Ok(Some(i)),
        SqlValue::Bool(b) => Ok(Some(i64::from(b))),
        SqlValue::Text(s) => s.trim().parse().map(Some).map_err(|_| format!("{:?} is not an integer", s)),
        other => Err(mismatch(&other, ty)),
    }
}

fn as_f64(value: SqlValue, ty: &Type) -> Result<Option<f64>, String> {
    match value {
        SqlValue::Null => Ok(None),
        SqlValue::Real(f) => Ok(Some(f)),
        SqlValue::Int(i) => Ok(Some(i as f64)),
        SqlValue::Text(s) => s.trim().parse().map(Some).map_err(|_| format!("{:?} is not a float", s)),
        other => Err(mismatch(&other, ty)),
    }
}

fn as_timestamp(value: SqlValue, ty: &Type) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        SqlValue::Null => Ok(None),
        SqlValue::Timestamp(ts) => Ok(Some(ts)),
        SqlValue::Text(s) => parse_timestamp("timestamp", &s).map(Some).map_err(|e| e.to_string()),
        other => Err(mismatch(&other, ty)),
    }
}

/// Text rendering for string-like and otherwise unknown parameter types.
fn as_text(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Text(s) => Some(s),
        SqlValue::Int(i) => Some(i.to_string()),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Bool(b) => Some(b.to_string()),
        SqlValue::Timestamp(ts) => Some(format_timestamp(&ts)),
        SqlValue::Bytes(b) => Some(String::from_utf8_lossy(&b).into_owned()),
    }
}

// ============================================================================
// ROW DECODING
// ============================================================================

fn decode_row(row: &Row) -> Result<RawRow, tokio_postgres::Error> {
    let mut out = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i)?.map(SqlValue::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)?
                .map(|v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)?
                .map(|v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)?.map(SqlValue::Int)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)?
                .map(|v| SqlValue::Real(f64::from(v)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i)?.map(SqlValue::Real)
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<DateTime<Utc>>>(i)?
                .map(SqlValue::Timestamp)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(i)?
                .map(|v| SqlValue::Timestamp(v.and_utc()))
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i)?.map(SqlValue::Bytes)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<serde_json::Value>>(i)?
                .map(|v| SqlValue::Text(v.to_string()))
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<uuid::Uuid>>(i)?
                .map(|v| SqlValue::Text(v.to_string()))
        } else {
            row.try_get::<_, Option<String>>(i)?.map(SqlValue::Text)
        };
        out.push((
            column.name().to_string(),
            value.unwrap_or(SqlValue::Null),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_integer_params_follow_server_type() {
        assert!(pg_param(SqlValue::Int(7), &Type::INT4).is_ok());
        assert!(pg_param(SqlValue::Int(i64::MAX), &Type::INT4).is_err());
        assert!(pg_param(SqlValue::Text("12".into()), &Type::INT8).is_ok());
        assert!(pg_param(SqlValue::Bytes(vec![1]), &Type::INT8).is_err());
    }

    #[test]
    fn test_null_params_are_typed() {
        for ty in [Type::BOOL, Type::INT8, Type::TIMESTAMPTZ, Type::BYTEA, Type::VARCHAR] {
            assert!(pg_param(SqlValue::Null, &ty).is_ok(), "null as {}", ty.name());
        }
    }

    #[test]
    fn test_text_rendering_for_unknown_types() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            as_text(SqlValue::Timestamp(ts)).as_deref(),
            Some("2024-01-02T03:04:05.000Z")
        );
        assert_eq!(as_text(SqlValue::Bool(true)).as_deref(), Some("true"));
        assert_eq!(as_text(SqlValue::Null), None);
    }

    #[test]
    fn test_timestamp_params_accept_text() {
        let v = as_timestamp(SqlValue::Text("2024-01-02T03:04:05Z".into()), &Type::TIMESTAMPTZ)
            .expect("parse should succeed");
        assert_eq!(v, Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()));
    }
}
