//! Schema migration tests against SQLite files
//!
//! Tests verify:
//! - A missing table is created with its indexes
//! - Migrating the same descriptor again changes nothing
//! - New descriptor fields become new columns, existing columns stay
//! - Indexes whose column signature already exists are not recreated
//! - Shards with separate storage get their own physical tables

use proptest::prelude::*;
use quarry_core::{ConfigStore, FieldDef, FieldType, IndexDef, TableDef, PRIMARY_SHARD};
use quarry_storage::{Database, DbBuilder};
use quarry_test_utils::fixtures::sqlite_config;
use quarry_test_utils::generators::arb_table_def;
use std::path::Path;

// ============================================================================
// TEST FIXTURES
// ============================================================================

async fn open(path: &Path) -> Database {
    let config: ConfigStore = sqlite_config(path, 2);
    DbBuilder::new(&config, "primary")
        .build()
        .await
        .expect("database should build")
}

fn widget_v1() -> TableDef {
    TableDef::new("Widget")
        .field(FieldDef::new("widgetId", FieldType::String).required())
        .field(FieldDef::new("color", FieldType::String))
        .primary_key(&["widgetId"])
        .index(IndexDef::new(&["color"]))
}

fn widget_v2() -> TableDef {
    widget_v1()
        .field(FieldDef::new("weight", FieldType::Float))
        .field(FieldDef::new("tags", FieldType::String).list())
        .index(IndexDef::new(&["weight DESC"]).named("heaviest"))
}

async fn columns(db: &Database, table: &str) -> Vec<String> {
    let mut session = db.session().await.expect("session should be available");
    let mut cols = session
        .table_columns(table)
        .await
        .expect("columns should load");
    cols.sort();
    cols
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_creates_missing_table_with_indexes() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let db = open(&dir.path().join("m.db")).await;

    let report = db
        .migrate_table(PRIMARY_SHARD, "widgets", true, &widget_v1())
        .await
        .expect("migration should succeed")
        .expect("first migration should run");

    assert!(report.created);
    assert_eq!(report.created_indexes.len(), 1);
    let physical = db.physical_table_name(PRIMARY_SHARD, "Widget", true);
    assert_eq!(columns(&db, &physical).await, vec!["color", "widget_id"]);
}

#[tokio::test]
async fn test_second_migration_in_process_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let db = open(&dir.path().join("m.db")).await;
    let cxt = quarry_core::ExecCxt::primary();

    assert!(db
        .ensure_table(&cxt, "widgets", true, &widget_v1())
        .await
        .expect("migration should succeed"));
    assert!(!db
        .ensure_table(&cxt, "widgets", true, &widget_v1())
        .await
        .expect("migration should succeed"));
}

#[tokio::test]
async fn test_remigration_from_fresh_process_is_noop() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let path = dir.path().join("m.db");

    open(&path)
        .await
        .migrate_table(PRIMARY_SHARD, "widgets", true, &widget_v1())
        .await
        .expect("migration should succeed");

    let report = open(&path)
        .await
        .migrate_table(PRIMARY_SHARD, "widgets", true, &widget_v1())
        .await
        .expect("migration should succeed")
        .expect("fresh database should migrate");
    assert!(report.is_noop(), "unexpected changes: {:?}", report);
}

#[tokio::test]
async fn test_new_fields_are_added_as_columns() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let path = dir.path().join("m.db");

    open(&path)
        .await
        .migrate_table(PRIMARY_SHARD, "widgets", true, &widget_v1())
        .await
        .expect("migration should succeed");

    let db = open(&path).await;
    let report = db
        .migrate_table(PRIMARY_SHARD, "widgets", true, &widget_v2())
        .await
        .expect("migration should succeed")
        .expect("fresh database should migrate");

    assert!(!report.created);
    assert_eq!(report.added_columns, vec!["weight", "tags"]);
    assert_eq!(report.created_indexes.len(), 1);
    assert!(report.created_indexes[0].contains("heaviest"));

    let physical = db.physical_table_name(PRIMARY_SHARD, "Widget", true);
    assert_eq!(
        columns(&db, &physical).await,
        vec!["color", "tags", "weight", "widget_id"]
    );
}

#[tokio::test]
async fn test_separate_shards_get_separate_tables() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let db = open(&dir.path().join("m.db")).await;

    db.migrate_table("east", "widgets", true, &widget_v1())
        .await
        .expect("migration should succeed");
    db.migrate_table("west", "widgets", true, &widget_v1())
        .await
        .expect("migration should succeed");

    let east = db.physical_table_name("east", "Widget", true);
    let west = db.physical_table_name("west", "Widget", true);
    assert_ne!(east, west);
    assert_eq!(columns(&db, &east).await.len(), 2);
    assert_eq!(columns(&db, &west).await.len(), 2);

    let shared = db.physical_table_name("east", "Widget", false);
    assert_eq!(shared, db.physical_table_name(PRIMARY_SHARD, "Widget", true));
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_migration_is_idempotent(table in arb_table_def()) {
        let rt = tokio::runtime::Runtime::new().expect("runtime should build");
        rt.block_on(async {
            let dir = tempfile::tempdir().expect("tempdir should succeed");
            let path = dir.path().join("p.db");

            let first = open(&path)
                .await
                .migrate_table(PRIMARY_SHARD, "props", true, &table)
                .await
                .expect("migration should succeed")
                .expect("first migration should run");
            prop_assert!(first.created);

            let second = open(&path)
                .await
                .migrate_table(PRIMARY_SHARD, "props", true, &table)
                .await
                .expect("migration should succeed")
                .expect("fresh database should migrate");
            prop_assert!(second.is_noop(), "unexpected changes: {:?}", second);
            Ok(())
        })?;
    }
}
