//! Error types for Quarry operations

use std::fmt;
use thiserror::Error;

/// Failure taxonomy shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Could not obtain or keep a live connection.
    Connection,
    /// A prepared statement or schema change failed while executing.
    Io,
    /// A programming error: bad descriptors, unknown topics, broken invariants.
    Code,
    /// Missing or malformed configuration.
    Config,
    /// A value could not be converted to or from its column encoding.
    Conversion,
    /// A unit of work rejected the transaction.
    Caller,
    /// The transaction engine ran out of attempts.
    RetriesExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::Io => "IO",
            ErrorKind::Code => "CODE",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Conversion => "CONVERSION",
            ErrorKind::Caller => "CALLER",
            ErrorKind::RetriesExhausted => "RETRIES_EXHAUSTED",
        };
        f.write_str(s)
    }
}

/// Database errors raised by drivers, sessions and the pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlError {
    #[error("Could not connect to database {database}: {reason}")]
    Connection { database: String, reason: String },

    #[error("No session available for database {database} after waiting {waited_ms}ms")]
    PoolTimeout { database: String, waited_ms: u64 },

    #[error("Connection to database {database} lost while running {statement}: {reason}")]
    ConnectionLost {
        database: String,
        statement: String,
        reason: String,
    },

    #[error("Statement {statement} failed on database {database}: {reason}")]
    Io {
        database: String,
        statement: String,
        reason: String,
        constraint_violation: bool,
    },

    #[error("Schema change on {table} in database {database} failed: {reason}")]
    SchemaChange {
        database: String,
        table: String,
        reason: String,
    },
}

impl SqlError {
    /// Whether the failure came from a uniqueness or other constraint check.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            SqlError::Io {
                constraint_violation: true,
                ..
            }
        )
    }

    /// Whether the session that produced this error must drop its connection.
    pub fn breaks_connection(&self) -> bool {
        matches!(self, SqlError::ConnectionLost { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Could not parse configuration from {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Database type not supported: {db_type}")]
    UnsupportedDbType { db_type: String },
}

/// Programming errors. These are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("Topic {topic} has not been registered")]
    UnknownTopic { topic: String },

    #[error("Row in {table} with key {key} disappeared during the transaction")]
    RowMissing { table: String, key: String },

    #[error("Lock table {table} cannot use auto-incrementing keys")]
    AutoIncrementLockTable { table: String },

    #[error("Table {table} has no touchedDate column and cannot be used as a lock table")]
    TouchColumnMissing { table: String },

    #[error("Table {table} has no primary key")]
    MissingPrimaryKey { table: String },

    #[error("Table {table} does not declare field {field}")]
    UnknownField { table: String, field: String },

    #[error("Missing value for key field {field} in {table}")]
    MissingKeyValue { table: String, field: String },

    #[error("Statement holder {name} registered twice with different types")]
    HolderTypeMismatch { name: String },

    #[error("Invariant violated: {reason}")]
    Invariant { reason: String },
}

/// Value conversion errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Field {field} expects {expected} but got {got}")]
    Unsupported {
        field: String,
        expected: String,
        got: String,
    },

    #[error("Malformed value for {field}: {reason}")]
    Malformed { field: String, reason: String },
}

/// Master error type for all Quarry errors.
#[derive(Debug, Clone, Error)]
pub enum QuarryError {
    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Code error: {0}")]
    Code(#[from] CodeError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Transaction rejected: {reason}")]
    Caller { reason: String },

    #[error("Transaction {tran} on topic {topic} failed after {attempts} attempts: {cause}")]
    RetriesExhausted {
        topic: String,
        tran: String,
        attempts: u32,
        cause: Box<QuarryError>,
    },
}

impl QuarryError {
    /// Build a caller-raised failure.
    pub fn caller(reason: impl Into<String>) -> Self {
        QuarryError::Caller {
            reason: reason.into(),
        }
    }

    /// Build an invariant failure.
    pub fn invariant(reason: impl Into<String>) -> Self {
        QuarryError::Code(CodeError::Invariant {
            reason: reason.into(),
        })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QuarryError::Sql(SqlError::Connection { .. })
            | QuarryError::Sql(SqlError::PoolTimeout { .. })
            | QuarryError::Sql(SqlError::ConnectionLost { .. }) => ErrorKind::Connection,
            QuarryError::Sql(_) => ErrorKind::Io,
            QuarryError::Config(_) => ErrorKind::Config,
            QuarryError::Code(_) => ErrorKind::Code,
            QuarryError::Conversion(_) => ErrorKind::Conversion,
            QuarryError::Caller { .. } => ErrorKind::Caller,
            QuarryError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }

    /// Failures raised by the database itself. The transaction engine retries these.
    pub fn is_database_sourced(&self) -> bool {
        matches!(self, QuarryError::Sql(_))
    }

    /// The innermost cause, unwrapping exhausted retries.
    pub fn root_cause(&self) -> &QuarryError {
        match self {
            QuarryError::RetriesExhausted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Result type alias for Quarry operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================
