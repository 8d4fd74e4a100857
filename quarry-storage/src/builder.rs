//! Database construction from configuration
//!
//! Every database entry lives under `db.<name>.`:
//!
//! | key                | meaning                                   | default      |
//! |--------------------|-------------------------------------------|--------------|
//! | `dbType`           | `postgresql` or `sqlite`                  | `postgresql` |
//! | `user`             | login role (PostgreSQL)                   | required     |
//! | `passwordKey`      | private key holding the password          | required     |
//! | `hostname`         | `host` or `host:port` (PostgreSQL)        | required     |
//! | `database`         | database on the server (PostgreSQL)       | required     |
//! | `path`             | database file (SQLite)                    | required     |
//! | `numConnections`   | session pool size                         | 20           |
//! | `useTimezoneWithTz`| timestamp columns carry a time zone       | per engine   |

use crate::database::Database;
use crate::driver::{Connector, PgConnector, SqliteConnector};
use quarry_core::{ConfigError, ConfigStore, DbEngine, DialectOptions, QuarryResult};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_NUM_CONNECTIONS: i64 = 20;
pub const DEFAULT_PG_PORT: u16 = 5432;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds one named database from its configuration entry.
pub struct DbBuilder<'a> {
    config: &'a ConfigStore,
    name: String,
}

impl<'a> DbBuilder<'a> {
    pub fn new(config: &'a ConfigStore, name: impl Into<String>) -> Self {
        Self {
            config,
            name: name.into(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("db.{}.{}", self.name, suffix)
    }

    fn require(&self, suffix: &str) -> Result<String, ConfigError> {
        self.config.require_str(&self.key(suffix))
    }

    pub fn engine(&self) -> Result<DbEngine, ConfigError> {
        self.config
            .get_str_or(&self.key("dbType"), DbEngine::Postgres.as_str())
            .parse()
    }

    pub fn dialect(&self) -> Result<DialectOptions, ConfigError> {
        let mut dialect = DialectOptions::for_engine(self.engine()?);
        dialect.use_timezone_with_tz = self
            .config
            .get_bool(&self.key("useTimezoneWithTz"), dialect.use_timezone_with_tz)?;
        Ok(dialect)
    }

    pub fn pool_size(&self) -> Result<usize, ConfigError> {
        let key = self.key("numConnections");
        let n = self.config.get_i64(&key, DEFAULT_NUM_CONNECTIONS)?;
        if n < 1 {
            return Err(ConfigError::InvalidValue {
                field: key,
                value: n.to_string(),
                reason: "pool size must be at least 1".to_string(),
            });
        }
        Ok(n as usize)
    }

    /// The connector described by the configuration entry.
    pub fn connector(&self) -> Result<Connector, ConfigError> {
        match self.engine()? {
            DbEngine::Sqlite => {
                let path = self.require("path")?;
                Ok(Connector::Sqlite(SqliteConnector::file(&self.name, path)))
            }
            DbEngine::Postgres => {
                let user = self.require("user")?;
                let password_key = self.require("passwordKey")?;
                let password = self.config.private_str(&password_key).ok_or_else(|| {
                    ConfigError::MissingRequired {
                        field: format!("private.{}", password_key),
                    }
                })?;
                let (host, port) = split_host(&self.key("hostname"), &self.require("hostname")?)?;
                let dbname = self.require("database")?;
                Ok(Connector::Postgres(PgConnector::new(
                    &self.name,
                    &host,
                    port,
                    &dbname,
                    &user,
                    Some(&password),
                    CONNECT_TIMEOUT,
                )))
            }
        }
    }

    /// Build the database, opening and closing one connection to prove the
    /// target is reachable.
    pub async fn build(&self) -> QuarryResult<Database> {
        let connector = self.connector()?;
        let dialect = self.dialect()?;
        let pool_size = self.pool_size()?;

        drop(connector.connect().await?);

        info!(
            database = %self.name,
            engine = dialect.engine.as_str(),
            pool_size,
            "Database created"
        );
        Ok(Database::new(self.name.clone(), connector, dialect, pool_size))
    }
}

/// A private in-memory database for one shard, used by memory simulation.
pub fn build_memory(name: &str, shard: &str) -> QuarryResult<Database> {
    let connector = SqliteConnector::memory(name, shard)?;
    info!(database = name, shard, "In-memory database created");
    Ok(Database::new(
        name,
        Connector::Sqlite(connector),
        DialectOptions::sqlite(),
        1,
    ))
}

fn split_host(key: &str, hostname: &str) -> Result<(String, u16), ConfigError> {
    match hostname.rsplit_once(':') {
        None => Ok((hostname.to_string(), DEFAULT_PG_PORT)),
        Some((host, port)) => {
            let port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value: hostname.to_string(),
                reason: "port must be a number".to_string(),
            })?;
            Ok((host.to_string(), port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_defaults_port() {
        assert_eq!(
            split_host("k", "db.local").expect("split should succeed"),
            ("db.local".to_string(), 5432)
        );
        assert_eq!(
            split_host("k", "db.local:6543").expect("split should succeed"),
            ("db.local".to_string(), 6543)
        );
        assert!(split_host("k", "db.local:x").is_err());
    }

    #[test]
    fn test_postgres_entry_requires_connection_fields() {
        let config = ConfigStore::new().with("db.primary.user", "app");
        let err = DbBuilder::new(&config, "primary").connector().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "db.primary.passwordKey".to_string()
            }
        );

        let config = config
            .with("db.primary.passwordKey", "pgPassword")
            .with("db.primary.hostname", "localhost");
        let err = DbBuilder::new(&config, "primary").connector().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "private.pgPassword".to_string()
            }
        );

        let config = config
            .with("private.pgPassword", "secret")
            .with("db.primary.database", "app");
        assert!(matches!(
            DbBuilder::new(&config, "primary").connector(),
            Ok(Connector::Postgres(_))
        ));
    }

    #[test]
    fn test_sqlite_entry_and_pool_size() {
        let config = ConfigStore::new()
            .with("db.local.dbType", "sqlite")
            .with("db.local.path", "/tmp/x.db")
            .with("db.local.numConnections", 4);
        let builder = DbBuilder::new(&config, "local");
        assert!(matches!(builder.connector(), Ok(Connector::Sqlite(_))));
        assert_eq!(builder.pool_size(), Ok(4));
        assert!(!builder.dialect().expect("dialect should parse").use_timezone_with_tz);

        let bad = config.with("db.local.numConnections", 0);
        assert!(DbBuilder::new(&bad, "local").pool_size().is_err());
    }

    #[test]
    fn test_unknown_engine_is_rejected() {
        let config = ConfigStore::new().with("db.x.dbType", "oracle");
        assert!(matches!(
            DbBuilder::new(&config, "x").engine(),
            Err(ConfigError::UnsupportedDbType { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_checks_connectivity() {
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("local.db");
        let config = ConfigStore::new()
            .with("db.local.dbType", "sqlite")
            .with("db.local.path", path.display().to_string());
        let db = DbBuilder::new(&config, "local")
            .build()
            .await
            .expect("build should succeed");
        assert_eq!(db.pool().size(), 20);
        assert!(path.exists());
    }
}
