//! Quarry Test Utilities
//!
//! Shared test infrastructure for the Quarry workspace:
//! - Fixture tables and topics
//! - Registries backed by temporary SQLite files or memory
//! - Proptest generators for table descriptors
//! - Assertions on Quarry error categories

pub use quarry_core::{
    CodeError, ConfigStore, ErrorKind, ExecCxt, FieldDef, FieldType, IndexDef, QuarryError,
    QuarryResult, Record, TableDef, Value,
};
pub use quarry_storage::{TopicInfo, TopicRegistry};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built tables and topics for common scenarios.

    use super::*;

    pub const COUNTER_TOPIC: &str = "counter";
    pub const COUNTER_ID: &str = "counterId";
    pub const HITS: &str = "hits";
    pub const LABEL: &str = "label";

    /// Lock table keyed by `counterId` with a hit count.
    pub fn counter_table() -> TableDef {
        TableDef::new("Counter")
            .field(FieldDef::new(COUNTER_ID, FieldType::String).required())
            .field(FieldDef::new(HITS, FieldType::Integer))
            .field(FieldDef::new(LABEL, FieldType::String))
            .with_protocol_fields()
            .primary_key(&[COUNTER_ID])
    }

    /// Counter topic; placeholder rows start at zero hits.
    pub fn counter_info() -> TopicInfo {
        TopicInfo::new(counter_table())
            .with_insert_defaults(Record::new().with(HITS, 0i64).with(LABEL, "new"))
    }

    /// Secondary table of per-counter events, used by query holders.
    pub fn counter_event_table() -> TableDef {
        TableDef::new("CounterEvent")
            .field(FieldDef::new(COUNTER_ID, FieldType::String).required())
            .field(FieldDef::new("eventId", FieldType::String).required())
            .field(FieldDef::new("amount", FieldType::Integer))
            .field(FieldDef::new("tags", FieldType::String).list().no_commas())
            .field(FieldDef::new(quarry_core::CREATED_DATE, FieldType::Timestamp))
            .primary_key(&[COUNTER_ID, "eventId"])
            .index(IndexDef::new(&[COUNTER_ID, "createdDate DESC"]))
    }

    /// Key data for one counter.
    pub fn counter_key(id: &str) -> Record {
        Record::new().with(COUNTER_ID, id)
    }

    /// Configuration for a single SQLite database named `primary`.
    pub fn sqlite_config(path: &Path, pool_size: i64) -> ConfigStore {
        ConfigStore::new()
            .with("db.primary.dbType", "sqlite")
            .with("db.primary.path", path.display().to_string())
            .with("db.primary.numConnections", pool_size)
    }
}

// ============================================================================
// REGISTRIES
// ============================================================================

/// A topic registry plus the temporary directory its database lives in.
pub struct TestRegistry {
    pub registry: Arc<TopicRegistry>,
    dir: Option<TempDir>,
}

impl TestRegistry {
    /// Registry over a fresh SQLite file with the counter topic registered.
    pub fn sqlite(pool_size: i64) -> Self {
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let config = fixtures::sqlite_config(&dir.path().join("quarry.db"), pool_size);
        Self::from_config(config, Some(dir))
    }

    /// Registry in memory simulation mode with the counter topic registered.
    pub fn memory() -> Self {
        let config = ConfigStore::new().with(quarry_storage::topic::registry::IN_MEMORY_SIMULATION, true);
        Self::from_config(config, None)
    }

    pub fn from_config(config: ConfigStore, dir: Option<TempDir>) -> Self {
        let registry = TopicRegistry::new(config).expect("registry should build");
        registry.register_topic(fixtures::COUNTER_TOPIC, fixtures::counter_info());
        Self {
            registry: Arc::new(registry),
            dir,
        }
    }

    /// Path of the SQLite file, when file-backed.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.path().join("quarry.db"))
    }
}

impl std::ops::Deref for TestRegistry {
    type Target = TopicRegistry;

    fn deref(&self) -> &TopicRegistry {
        &self.registry
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for table descriptors and values.

    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    /// camelCase field name that never collides with protocol fields.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "f[a-z]{1,6}([A-Z][a-z]{1,5}){0,2}"
    }

    pub fn arb_field_type() -> impl Strategy<Value = FieldType> {
        prop_oneof![
            Just(FieldType::String),
            Just(FieldType::Integer),
            Just(FieldType::Float),
            Just(FieldType::Timestamp),
            Just(FieldType::Boolean),
            Just(FieldType::Binary),
            Just(FieldType::Map),
        ]
    }

    /// Table with a string key and 1 to 6 uniquely named extra fields.
    pub fn arb_table_def() -> impl Strategy<Value = TableDef> {
        (
            "[A-Z][a-z]{2,8}",
            prop::collection::btree_map(arb_field_name(), arb_field_type(), 1..6),
        )
            .prop_map(|(name, fields)| {
                let mut table = TableDef::new(format!("P{}", name))
                    .field(FieldDef::new("pk", FieldType::String).required());
                for (field, ty) in fields {
                    table = table.field(FieldDef::new(field, ty));
                }
                table.primary_key(&["pk"])
            })
    }

    /// A value of the given type, restricted to what every engine stores exactly.
    pub fn arb_value(ty: FieldType) -> BoxedStrategy<Value> {
        match ty {
            FieldType::String => "[a-zA-Z0-9 ]{0,20}".prop_map(Value::from).boxed(),
            FieldType::Integer => any::<i64>().prop_map(Value::from).boxed(),
            FieldType::Float => (-1.0e6f64..1.0e6).prop_map(Value::from).boxed(),
            FieldType::Boolean => any::<bool>().prop_map(Value::from).boxed(),
            FieldType::Binary => prop::collection::vec(any::<u8>(), 0..16)
                .prop_map(Value::from)
                .boxed(),
            FieldType::Timestamp => (0i64..4_000_000_000_000)
                .prop_map(|ms| {
                    Utc.timestamp_millis_opt(ms)
                        .single()
                        .map(Value::from)
                        .unwrap_or(Value::Null)
                })
                .boxed(),
            FieldType::Map => "[a-z]{1,6}"
                .prop_map(|k| quarry_core::types::map_of([(k, Value::from(1i64))]))
                .boxed(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Quarry error categories.

    use super::*;

    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &QuarryResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "Wrong error kind for {:?}", e),
            Ok(v) => panic!("Expected {:?} error, got Ok({:?})", kind, v),
        }
    }

    /// Assert that the result is RetriesExhausted after `attempts` attempts.
    #[track_caller]
    pub fn assert_retries_exhausted<T: std::fmt::Debug>(result: &QuarryResult<T>, attempts: u32) {
        match result {
            Err(QuarryError::RetriesExhausted { attempts: a, .. }) => {
                assert_eq!(*a, attempts, "Wrong attempt count");
            }
            other => panic!("Expected RetriesExhausted, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_row_missing<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Code(CodeError::RowMissing { .. })) => {}
            other => panic!("Expected RowMissing, got: {:?}", other),
        }
    }
}
