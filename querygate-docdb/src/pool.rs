//! MongoDB client/database wrapper (§4.4 connection layer, document-store form). Grounded on the
//! donor's `prax-mongodb/src/client.rs` `MongoClient`/`MongoClientBuilder`: "the MongoDB driver handles
//! connection pooling internally, so this client wraps the driver's Client with additional
//! [gateway-]specific functionality" — the same note applies here, generalized to the per-OBO-identity
//! pool memoization the three SQL dialect crates also implement.

use std::collections::HashMap;
use std::sync::Arc;

use bson::Document;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use parking_lot::Mutex;

use querygate_core::{derive_pool_key, GatewayError, GatewayResult};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connect_timeout: std::time::Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_pool_size: 10, min_pool_size: 1, connect_timeout: std::time::Duration::from_secs(30) }
    }
}

/// Wraps a default [`Database`] handle plus a memoized per-OBO-identity set of `Client`s. Unlike the
/// three SQL dialects, MongoDB's driver has no notion of an `application_name` set after connection —
/// the app-name tag is part of `ClientOptions` at `Client::with_options` time — so an OBO identity gets
/// its own whole `Client` (and therefore its own internally-pooled connection set) rather than sharing
/// one pool's connections under a different session-context claim.
pub struct DocDbPool {
    base_options: ClientOptions,
    database_name: String,
    base_app_name: String,
    default_database: Database,
    obo_databases: Mutex<HashMap<String, Database>>,
}

impl DocDbPool {
    pub async fn new(uri: &str, database_name: &str, pool_config: &PoolConfig) -> GatewayResult<Self> {
        let mut base_options = ClientOptions::parse(uri)
            .await
            .map_err(|e| GatewayError::database_operation_failed(format!("document-store URI parse failed: {e}"), true))?;
        let base_app_name = base_options.app_name.clone().unwrap_or_else(|| "querygate".to_string());
        base_options.app_name = Some(base_app_name.clone());
        base_options.max_pool_size = Some(pool_config.max_pool_size);
        base_options.min_pool_size = Some(pool_config.min_pool_size);
        base_options.connect_timeout = Some(pool_config.connect_timeout);

        let client = Client::with_options(base_options.clone())
            .map_err(|e| GatewayError::database_operation_failed(format!("document-store client creation failed: {e}"), true))?;
        let default_database = client.database(database_name);

        Ok(Self {
            base_options,
            database_name: database_name.to_string(),
            base_app_name,
            default_database,
            obo_databases: Mutex::new(HashMap::new()),
        })
    }

    pub fn default_database(&self) -> &Database {
        &self.default_database
    }

    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.default_database.collection(name)
    }

    /// Memoized per-`(issuer, oid/sub)` database handle, each backed by its own `Client` carrying a
    /// distinguishing `app_name` (§4.4 "Per-user connection-pool isolation" applied to a driver that
    /// pools per-`Client`, not per-checkout).
    pub async fn database_for_obo_identity(&self, issuer: &str, oid_or_sub: &str) -> GatewayResult<Database> {
        let pool_key = derive_pool_key(issuer, oid_or_sub);
        if let Some(database) = self.obo_databases.lock().get(&pool_key) {
            return Ok(database.clone());
        }

        let mut options = self.base_options.clone();
        options.app_name = Some(querygate_core::obo_application_identifier(&self.base_app_name, &pool_key));
        let client = Client::with_options(options)
            .map_err(|e| GatewayError::database_operation_failed(format!("document-store OBO client creation failed: {e}"), true))?;
        let database = client.database(&self.database_name);

        self.obo_databases.lock().insert(pool_key, database.clone());
        Ok(database)
    }
}

pub struct DocDbPoolBuilder {
    uri: String,
    database_name: String,
    pool_config: PoolConfig,
}

impl DocDbPoolBuilder {
    pub fn new(uri: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self { uri: uri.into(), database_name: database_name.into(), pool_config: PoolConfig::default() }
    }

    pub fn pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    pub async fn build(self) -> GatewayResult<DocDbPool> {
        DocDbPool::new(&self.uri, &self.database_name, &self.pool_config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_default_matches_the_other_dialect_crates() {
        let config = PoolConfig::default();
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.min_pool_size, 1);
    }
}
