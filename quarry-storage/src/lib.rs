//! Quarry Storage - Relational Persistence
//!
//! Database access for services built on topics:
//!
//! - [`session`]: bounded session pool with per-session statement caches
//! - [`migrate`]: additive schema migration from table descriptors
//! - [`topic`]: topics, query holders and the registry that routes them
//! - [`tran`]: touch-lock transactions with bounded retries
//!
//! PostgreSQL and SQLite are supported through [`driver`].

pub mod builder;
pub mod database;
pub mod driver;
pub mod migrate;
pub mod session;
pub mod telemetry;
pub mod topic;
pub mod tran;

pub use builder::{build_memory, DbBuilder};
pub use database::{Database, DbResolver};
pub use migrate::MigrationReport;
pub use session::{PooledSession, SessionPool};
pub use telemetry::{init_tracing, TelemetryConfig};
pub use topic::{QueryHolder, Topic, TopicInfo, TopicRegistry};
pub use tran::{execute_topic_tran, TranContext, MAX_ATTEMPTS};

pub use quarry_core::{
    CodeError, ConfigError, ConfigStore, ExecCxt, QuarryError, QuarryResult, Record, SqlError,
    TableDef, Value,
};
