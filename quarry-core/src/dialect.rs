//! Database engines and the dialect switches that shape generated SQL

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbEngine {
    /// PostgreSQL server.
    Postgres,
    /// Embedded SQLite, file-backed or shared in-memory.
    Sqlite,
}

impl DbEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbEngine::Postgres => "postgresql",
            DbEngine::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DbEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbEngine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(DbEngine::Postgres),
            "sqlite" | "sqlite3" => Ok(DbEngine::Sqlite),
            other => Err(ConfigError::UnsupportedDbType {
                db_type: other.to_string(),
            }),
        }
    }
}

/// Engine-specific behavior for naming, typing and placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectOptions {
    pub engine: DbEngine,
    /// Identifiers keep their case; no snake-case aliasing is applied.
    pub identifiers_case_sensitive: bool,
    /// Unquoted identifiers are reported back lower-case by metadata queries.
    pub stores_lower_case_identifiers: bool,
    /// Timestamp columns carry a time zone.
    pub use_timezone_with_tz: bool,
    /// The engine has a serial column type for auto-increment keys.
    pub has_serial_type: bool,
    /// Non-primary shards get a shard prefix in physical table names.
    pub use_shard_in_table_names: bool,
    /// Placeholders are rendered `$1, $2, ...` instead of `?`.
    pub numbered_placeholders: bool,
}

impl DialectOptions {
    pub fn postgres() -> Self {
        Self {
            engine: DbEngine::Postgres,
            identifiers_case_sensitive: false,
            stores_lower_case_identifiers: true,
            use_timezone_with_tz: true,
            has_serial_type: true,
            use_shard_in_table_names: true,
            numbered_placeholders: true,
        }
    }

    pub fn sqlite() -> Self {
        Self {
            engine: DbEngine::Sqlite,
            identifiers_case_sensitive: false,
            stores_lower_case_identifiers: true,
            use_timezone_with_tz: false,
            has_serial_type: false,
            use_shard_in_table_names: true,
            numbered_placeholders: false,
        }
    }

    pub fn for_engine(engine: DbEngine) -> Self {
        match engine {
            DbEngine::Postgres => Self::postgres(),
            DbEngine::Sqlite => Self::sqlite(),
        }
    }

    /// Column type spelling for an auto-incrementing integer key.
    pub fn auto_increment_type(&self) -> &'static str {
        match self.engine {
            DbEngine::Postgres if self.has_serial_type => "bigserial",
            DbEngine::Postgres => "bigint generated by default as identity",
            // Only an exact INTEGER primary key aliases the rowid.
            DbEngine::Sqlite => "integer",
        }
    }

    /// Column type for binary payloads.
    pub fn binary_type(&self) -> &'static str {
        match self.engine {
            DbEngine::Postgres => "bytea",
            DbEngine::Sqlite => "blob",
        }
    }

    pub fn timestamp_type(&self) -> &'static str {
        if self.use_timezone_with_tz {
            "timestamptz"
        } else {
            "timestamp"
        }
    }

    /// Column names returned by the driver must be lower-cased before alias lookup.
    pub fn convert_upper_to_lower(&self) -> bool {
        !self.stores_lower_case_identifiers && !self.identifiers_case_sensitive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_parse() {
        assert_eq!("postgresql".parse::<DbEngine>().expect("pg"), DbEngine::Postgres);
        assert_eq!("SQLite".parse::<DbEngine>().expect("sqlite"), DbEngine::Sqlite);
        assert!(matches!(
            "oracle".parse::<DbEngine>(),
            Err(ConfigError::UnsupportedDbType { .. })
        ));
    }

    #[test]
    fn test_auto_increment_spelling() {
        assert_eq!(DialectOptions::postgres().auto_increment_type(), "bigserial");
        let mut no_serial = DialectOptions::postgres();
        no_serial.has_serial_type = false;
        assert!(no_serial.auto_increment_type().contains("identity"));
        assert_eq!(DialectOptions::sqlite().auto_increment_type(), "integer");
    }

    #[test]
    fn test_timestamp_type_follows_tz_flag() {
        assert_eq!(DialectOptions::postgres().timestamp_type(), "timestamptz");
        assert_eq!(DialectOptions::sqlite().timestamp_type(), "timestamp");
    }
}
