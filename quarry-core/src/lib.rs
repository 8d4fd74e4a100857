//! Quarry Core - Shared Types
//!
//! Errors, tagged values, table descriptors, configuration and the type
//! mapper. Every other Quarry crate depends on this one; it has no I/O
//! beyond reading configuration files.

pub mod config;
pub mod context;
pub mod dialect;
pub mod error;
pub mod ident;
pub mod schema;
pub mod types;
pub mod value;

pub use config::ConfigStore;
pub use context::{Clock, ExecCxt, FixedClock, SystemClock, PRIMARY_SHARD};
pub use dialect::{DbEngine, DialectOptions};
pub use error::{
    CodeError, ConfigError, ConversionError, ErrorKind, QuarryError, QuarryResult, SqlError,
};
pub use schema::{
    protocol_fields, reserved_fields, FieldDef, FieldType, IndexDef, TableCatalog, TableDef,
    CREATED_DATE, ENABLED, INITIAL_INSERT, LAST_TRAN_ID, MODIFIED_DATE, TOUCHED_DATE, USER_GROUP,
    USER_ID,
};
pub use types::SqlValue;
pub use value::{Record, Value};
