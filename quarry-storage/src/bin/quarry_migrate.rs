//! Quarry Migrate - apply a table catalog to a configured database
//!
//! Usage: quarry-migrate <config.toml> <catalog.toml> [topic] [shard]
//!
//! The topic decides routing and column aliases; it defaults to `schema`.
//! The shard defaults to `primary`.

use quarry_core::{ConfigStore, ExecCxt, QuarryError, QuarryResult, TableCatalog};
use quarry_storage::{init_tracing, TelemetryConfig, TopicRegistry};
use std::process::ExitCode;

const DEFAULT_TOPIC: &str = "schema";

fn usage() {
    eprintln!("Usage: quarry-migrate <config.toml> <catalog.toml> [topic] [shard]");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  quarry-migrate conf/quarry.toml conf/tables.toml auth primary");
}

fn load_catalog(path: &str) -> QuarryResult<TableCatalog> {
    let source = std::fs::read_to_string(path).map_err(|e| quarry_core::ConfigError::Parse {
        source_name: path.to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&source).map_err(|e| {
        QuarryError::from(quarry_core::ConfigError::Parse {
            source_name: path.to_string(),
            reason: e.to_string(),
        })
    })
}

async fn run(args: &[String]) -> QuarryResult<()> {
    let mut config = ConfigStore::from_file(&args[1])?;
    config.apply_env_overrides();
    let catalog = load_catalog(&args[2])?;
    let topic = args.get(3).map(String::as_str).unwrap_or(DEFAULT_TOPIC);
    let cxt = match args.get(4) {
        Some(shard) => ExecCxt::new(shard.clone()),
        None => ExecCxt::primary(),
    };

    let registry = TopicRegistry::new(config)?;
    let database = registry.database_for(&cxt, topic).await?;
    for table in &catalog.tables {
        match database.migrate_table(&cxt.shard, topic, true, table).await? {
            Some(report) if report.is_noop() => println!("{}: up to date", report.table),
            Some(report) if report.created => println!("{}: created", report.table),
            Some(report) => println!(
                "{}: added columns [{}], created indexes [{}]",
                report.table,
                report.added_columns.join(", "),
                report.created_indexes.join(", ")
            ),
            None => println!("{}: already migrated", table.name),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        usage();
        return ExitCode::FAILURE;
    }

    if let Err(e) = init_tracing(&TelemetryConfig::default()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Migration failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
