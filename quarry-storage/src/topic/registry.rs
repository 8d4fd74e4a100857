//! Topic registry and router
//!
//! Maps `(topic, shard)` to a [`Topic`] and the [`Database`] behind it.
//! Routing follows the configuration in this order:
//!
//! 1. `dbTopic.<topic>.shardGroup` names a group, and
//!    `dbShardGroup.<group>.shards.<shard>.dbName` names the database
//! 2. `dbTopic.<topic>.dbName`
//! 3. `primary`
//!
//! With `inMemorySimulation = true` every topic lands in one private
//! in-memory database per shard instead.

use super::{Topic, TopicInfo};
use crate::builder::{build_memory, DbBuilder};
use crate::database::Database;
use quarry_core::{CodeError, ConfigStore, ExecCxt, QuarryResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Database used when no routing entry matches.
pub const DEFAULT_DATABASE: &str = "primary";

/// Configuration flag that switches every topic to in-memory storage.
pub const IN_MEMORY_SIMULATION: &str = "inMemorySimulation";

type TopicKey = (String, String);

pub struct TopicRegistry {
    config: ConfigStore,
    in_memory: bool,
    infos: RwLock<HashMap<String, TopicInfo>>,
    routes: RwLock<HashMap<TopicKey, String>>,
    databases: RwLock<HashMap<String, Arc<Database>>>,
    topics: RwLock<HashMap<TopicKey, Arc<Topic>>>,
    creation: tokio::sync::Mutex<()>,
}

impl TopicRegistry {
    pub fn new(config: ConfigStore) -> QuarryResult<Self> {
        let in_memory = config.get_bool(IN_MEMORY_SIMULATION, false)?;
        Ok(Self {
            config,
            in_memory,
            infos: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            databases: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            creation: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Register a topic so it can be resolved. Re-registering replaces the
    /// info for topics not yet created.
    pub fn register_topic(&self, name: impl Into<String>, info: TopicInfo) {
        write(&self.infos).insert(name.into(), info);
    }

    pub fn topic_info(&self, name: &str) -> Option<TopicInfo> {
        read(&self.infos).get(name).cloned()
    }

    /// Name of the database that stores `topic` for `shard`.
    pub fn database_name_for(&self, topic: &str, shard: &str) -> String {
        let key = (topic.to_string(), shard.to_string());
        if let Some(name) = read(&self.routes).get(&key) {
            return name.clone();
        }
        let name = if self.in_memory {
            format!("mem:{}", shard)
        } else {
            route(&self.config, topic, shard)
        };
        debug!(topic, shard, database = %name, "Resolved topic route");
        write(&self.routes).insert(key, name.clone());
        name
    }

    /// The database registered under `name`, built on first use.
    pub async fn database(&self, name: &str) -> QuarryResult<Arc<Database>> {
        if let Some(db) = read(&self.databases).get(name) {
            return Ok(Arc::clone(db));
        }
        let _guard = self.creation.lock().await;
        self.database_locked(name, None).await
    }

    /// The database behind `topic` for the caller's shard.
    pub async fn database_for(&self, cxt: &ExecCxt, topic: &str) -> QuarryResult<Arc<Database>> {
        let name = self.database_name_for(topic, &cxt.shard);
        if let Some(db) = read(&self.databases).get(&name) {
            return Ok(Arc::clone(db));
        }
        let _guard = self.creation.lock().await;
        self.database_locked(&name, Some(&cxt.shard)).await
    }

    /// Resolve a topic for the caller's shard, creating it on first use.
    pub async fn topic(&self, cxt: &ExecCxt, name: &str) -> QuarryResult<Arc<Topic>> {
        let key = (name.to_string(), cxt.shard.clone());
        if let Some(topic) = read(&self.topics).get(&key) {
            return Ok(Arc::clone(topic));
        }

        let _guard = self.creation.lock().await;
        if let Some(topic) = read(&self.topics).get(&key) {
            return Ok(Arc::clone(topic));
        }

        let info = self.topic_info(name).ok_or_else(|| CodeError::UnknownTopic {
            topic: name.to_string(),
        })?;
        let db_name = self.database_name_for(name, &cxt.shard);
        let database = self.database_locked(&db_name, Some(&cxt.shard)).await?;
        let topic = Arc::new(Topic::create(cxt, name, info, database).await?);
        write(&self.topics).insert(key, Arc::clone(&topic));
        Ok(topic)
    }

    /// Build or fetch a database. Callers hold the creation lock.
    async fn database_locked(&self, name: &str, shard: Option<&str>) -> QuarryResult<Arc<Database>> {
        if let Some(db) = read(&self.databases).get(name) {
            return Ok(Arc::clone(db));
        }
        let db = match (self.in_memory, name.strip_prefix("mem:")) {
            (true, Some(mem_shard)) => build_memory(name, shard.unwrap_or(mem_shard))?,
            _ => DbBuilder::new(&self.config, name).build().await?,
        };
        let db = Arc::new(db);
        write(&self.databases).insert(name.to_string(), Arc::clone(&db));
        Ok(db)
    }
}

/// Configured database name for `topic` under `shard`.
pub fn route(config: &ConfigStore, topic: &str, shard: &str) -> String {
    if let Some(group) = config.get_str(&format!("dbTopic.{}.shardGroup", topic)) {
        if let Some(db) = config.get_str(&format!("dbShardGroup.{}.shards.{}.dbName", group, shard)) {
            return db;
        }
    }
    config
        .get_str(&format!("dbTopic.{}.dbName", topic))
        .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routing_config() -> ConfigStore {
        ConfigStore::new()
            .with("dbTopic.orders.shardGroup", "regional")
            .with("dbShardGroup.regional.shards.east.dbName", "ordersEast")
            .with("dbTopic.orders.dbName", "ordersMain")
            .with("dbTopic.audit.dbName", "auditDb")
    }

    #[test]
    fn test_route_prefers_shard_group() {
        let config = routing_config();
        assert_eq!(route(&config, "orders", "east"), "ordersEast");
        assert_eq!(route(&config, "orders", "west"), "ordersMain");
        assert_eq!(route(&config, "audit", "east"), "auditDb");
        assert_eq!(route(&config, "unrouted", "east"), DEFAULT_DATABASE);
    }

    #[test]
    fn test_memory_simulation_routes_by_shard() {
        let config = routing_config().with(IN_MEMORY_SIMULATION, true);
        let registry = TopicRegistry::new(config).expect("registry should build");
        assert_eq!(registry.database_name_for("orders", "east"), "mem:east");
        assert_eq!(registry.database_name_for("audit", "east"), "mem:east");
        assert_eq!(registry.database_name_for("audit", "primary"), "mem:primary");
    }

    #[tokio::test]
    async fn test_unknown_topic_is_code_error() {
        let config = ConfigStore::new().with(IN_MEMORY_SIMULATION, true);
        let registry = TopicRegistry::new(config).expect("registry should build");
        let err = registry
            .topic(&ExecCxt::primary(), "missing")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), quarry_core::ErrorKind::Code);
    }
}
