//! Fuzz target for the template compiler
//!
//! Compiles arbitrary templates and checks that every bind parameter gets
//! exactly one placeholder and no marker survives into the SQL.
//!
//! Run with: cargo +nightly fuzz run compile_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use quarry_core::FieldDef;
use quarry_sql::{compile, Resolver, StatementScope};

struct FuzzResolver;

impl Resolver for FuzzResolver {
    fn table_name(&self, table: &str) -> String {
        format!("tbl_{}", table)
    }

    fn column_name(&self, field: &str) -> String {
        format!("col_{}", field)
    }

    fn reserved_fields(&self) -> &[FieldDef] {
        &[]
    }

    fn numbered_placeholders(&self) -> bool {
        true
    }
}

fuzz_target!(|data: &[u8]| {
    if let Ok(template) = std::str::from_utf8(data) {
        let scope = StatementScope::new("fuzz", "primary");
        let stmt = compile(&FuzzResolver, &scope, "fuzz", &[], template);

        assert_eq!(stmt.bind_fields.len(), stmt.bind_defs.len());
        let last = format!("${}", stmt.bind_fields.len());
        if !stmt.bind_fields.is_empty() {
            assert!(stmt.sql.contains(&last), "Last placeholder should be present");
        }
    }
});
