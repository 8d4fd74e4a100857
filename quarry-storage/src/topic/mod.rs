//! Topics
//!
//! A topic is a named, shard-bound unit of storage: one lock table with its
//! canonical statements, plus lazily created query holders for the
//! feature-specific statements that code built on the topic needs.

pub mod registry;

pub use registry::TopicRegistry;

use crate::database::Database;
use crate::session::PooledSession;
use async_trait::async_trait;
use quarry_core::{CodeError, ExecCxt, QuarryResult, Record, TableDef};
use quarry_sql::{named_select, CanonicalStatements, CompiledStatement, StatementScope};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Static description of a topic, registered before first use.
#[derive(Debug, Clone)]
pub struct TopicInfo {
    /// Descriptor of the lock table.
    pub lock_table: TableDef,
    /// Defaults for placeholder rows, merged under the caller's key data.
    pub insert_defaults: Record,
    /// Each shard keeps its own physical tables.
    pub shards_have_separate_storage: bool,
}

impl TopicInfo {
    pub fn new(lock_table: TableDef) -> Self {
        Self {
            lock_table,
            insert_defaults: Record::new(),
            shards_have_separate_storage: true,
        }
    }

    pub fn with_insert_defaults(mut self, defaults: Record) -> Self {
        self.insert_defaults = defaults;
        self
    }

    pub fn shared_across_shards(mut self) -> Self {
        self.shards_have_separate_storage = false;
        self
    }
}

/// Feature-specific statements owned by a topic.
///
/// A holder is built once per topic and initialized inside a session, which
/// is where it compiles its statements and migrates any extra tables.
#[async_trait]
pub trait QueryHolder: Send + Sync + 'static {
    async fn init(&mut self, topic: &Topic, session: &mut PooledSession) -> QuarryResult<()>;
}

type HolderMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

pub struct Topic {
    name: String,
    shard: String,
    info: TopicInfo,
    database: Arc<Database>,
    statements: CanonicalStatements,
    holders: RwLock<HolderMap>,
    holder_init: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("shard", &self.shard)
            .field("database", &self.database.name())
            .field("lock_table", &self.info.lock_table.name)
            .finish()
    }
}

impl Topic {
    /// Migrate the lock table and compile its canonical statements.
    pub async fn create(
        cxt: &ExecCxt,
        name: &str,
        info: TopicInfo,
        database: Arc<Database>,
    ) -> QuarryResult<Self> {
        let separate = info.shards_have_separate_storage;
        database
            .ensure_table(cxt, name, separate, &info.lock_table)
            .await?;

        let scope = StatementScope::new(name, cxt.shard.clone());
        let statements = {
            let resolver = database.resolver(name, &cxt.shard, separate);
            CanonicalStatements::build(&resolver, &scope, &info.lock_table)?
        };

        info!(
            topic = name,
            shard = %cxt.shard,
            database = %database.name(),
            lock_table = %info.lock_table.name,
            "Topic initialized"
        );
        Ok(Self {
            name: name.to_string(),
            shard: cxt.shard.clone(),
            info,
            database,
            statements,
            holders: RwLock::new(HashMap::new()),
            holder_init: tokio::sync::Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shard(&self) -> &str {
        &self.shard
    }

    pub fn info(&self) -> &TopicInfo {
        &self.info
    }

    pub fn lock_table(&self) -> &TableDef {
        &self.info.lock_table
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Canonical statements of the lock table.
    pub fn statements(&self) -> &CanonicalStatements {
        &self.statements
    }

    pub fn scope(&self) -> StatementScope {
        StatementScope::new(self.name.clone(), self.shard.clone())
    }

    /// Physical name of `table` under this topic's shard.
    pub fn table_name(&self, table: &str) -> String {
        self.database.physical_table_name(
            &self.shard,
            table,
            self.info.shards_have_separate_storage,
        )
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    /// Compile a bespoke template in this topic's naming scope.
    pub fn compile(&self, name: &str, table: &TableDef, template: &str) -> CompiledStatement {
        self.database.compile(
            &self.scope(),
            self.info.shards_have_separate_storage,
            name,
            &table.fields,
            template,
        )
    }

    /// Select on `table` filtered by equality on each of `and_fields`.
    pub fn named_select(&self, name: &str, table: &TableDef, and_fields: &[String]) -> CompiledStatement {
        let resolver = self.database.resolver(
            &self.name,
            &self.shard,
            self.info.shards_have_separate_storage,
        );
        named_select(&resolver, &self.scope(), name, table, and_fields)
    }

    /// Canonical statements for another table stored under this topic.
    pub fn table_statements(&self, table: &TableDef) -> Result<CanonicalStatements, CodeError> {
        let resolver = self.database.resolver(
            &self.name,
            &self.shard,
            self.info.shards_have_separate_storage,
        );
        CanonicalStatements::build(&resolver, &self.scope(), table)
    }

    /// Migrate another table stored under this topic.
    pub async fn ensure_table(&self, table: &TableDef) -> QuarryResult<bool> {
        Ok(self
            .database
            .migrate_table(
                &self.shard,
                &self.name,
                self.info.shards_have_separate_storage,
                table,
            )
            .await?
            .is_some())
    }

    /// Migrate another table using a session the caller already holds, as a
    /// query holder does during `init`.
    pub async fn ensure_table_in(
        &self,
        session: &mut PooledSession,
        table: &TableDef,
    ) -> QuarryResult<bool> {
        Ok(self
            .database
            .migrate_table_in(
                session,
                &self.shard,
                &self.name,
                self.info.shards_have_separate_storage,
                table,
            )
            .await?
            .is_some())
    }

    // ========================================================================
    // QUERY HOLDERS
    // ========================================================================

    /// The holder registered under `name`, creating and initializing it on
    /// first use. Concurrent first callers wait for one initialization.
    pub async fn query_holder<H, F>(&self, name: &str, create: F) -> QuarryResult<Arc<H>>
    where
        H: QueryHolder,
        F: FnOnce(&Topic) -> H + Send,
    {
        if let Some(holder) = self.cached_holder::<H>(name)? {
            return Ok(holder);
        }

        let _guard = self.holder_init.lock().await;
        if let Some(holder) = self.cached_holder::<H>(name)? {
            return Ok(holder);
        }

        let mut holder = create(self);
        let mut session = self.database.session().await?;
        holder.init(self, &mut session).await?;
        drop(session);

        let holder = Arc::new(holder);
        let erased: Arc<dyn Any + Send + Sync> = holder.clone();
        match self.holders.write() {
            Ok(mut guard) => guard.insert(name.to_string(), erased),
            Err(poisoned) => poisoned.into_inner().insert(name.to_string(), erased),
        };
        Ok(holder)
    }

    fn cached_holder<H: QueryHolder>(&self, name: &str) -> QuarryResult<Option<Arc<H>>> {
        let found = match self.holders.read() {
            Ok(guard) => guard.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        };
        match found {
            None => Ok(None),
            Some(any) => any.downcast::<H>().map(Some).map_err(|_| {
                CodeError::HolderTypeMismatch {
                    name: name.to_string(),
                }
                .into()
            }),
        }
    }
}
