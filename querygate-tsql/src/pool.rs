//! T-SQL connection pool, grounded on the donor's `prax-mssql/src/pool.rs` `MssqlPool`/`PoolConfig`
//! shape (bb8 over a `bb8_tiberius::ConnectionManager`), extended with per-user pool derivation for
//! on-behalf-of isolation (§4.4 "Per-user connection-pool isolation").

use std::sync::Arc;
use std::time::Duration;

use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use parking_lot::Mutex;
use tiberius::Config;

use querygate_core::{derive_pool_key, obo_application_identifier, GatewayError, GatewayResult};
use std::collections::HashMap;

/// Pool-sizing knobs, defaulted the way the donor's `PoolConfig` was.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// A single data source's T-SQL pool, plus a side-table of per-user (OBO) pools keyed by pool key
/// (§4.4): each OBO identity gets its own bb8 pool with an `application_name` suffix so the database
/// sees a distinguishable connection even though the base connection template is shared.
pub struct TsqlPool {
    base_config: Config,
    pool_config: PoolConfig,
    base_app_name: String,
    default_pool: Pool<ConnectionManager>,
    obo_pools: Mutex<HashMap<String, Pool<ConnectionManager>>>,
}

impl TsqlPool {
    pub async fn new(connection_string: &str, base_app_name: impl Into<String>, pool_config: PoolConfig) -> GatewayResult<Self> {
        let base_config = Config::from_ado_string(connection_string)
            .map_err(|e| GatewayError::unexpected(format!("invalid T-SQL connection string: {e}")))?;
        let base_app_name = base_app_name.into();
        let default_pool = build_pool(base_config.clone(), &pool_config).await?;
        Ok(Self { base_config, pool_config, base_app_name, default_pool, obo_pools: Mutex::new(HashMap::new()) })
    }

    /// Returns the default pool, used when there's no request-scoped identity (e.g. at startup warmup).
    pub fn default_pool(&self) -> &Pool<ConnectionManager> {
        &self.default_pool
    }

    /// Returns (creating if necessary) the per-user pool for `issuer`/`oid_or_sub` (§4.4 scenario 6): the
    /// pool key is derived once and memoized so repeat requests from the same identity reuse the pool.
    pub async fn pool_for_obo_identity(&self, issuer: &str, oid_or_sub: &str) -> GatewayResult<Pool<ConnectionManager>> {
        let pool_key = derive_pool_key(issuer, oid_or_sub);
        if let Some(existing) = self.obo_pools.lock().get(&pool_key).cloned() {
            return Ok(existing);
        }

        let mut config = self.base_config.clone();
        let app_name = obo_application_identifier(&self.base_app_name, &pool_key);
        config.application_name(app_name);

        let pool = build_pool(config, &self.pool_config).await?;
        self.obo_pools.lock().insert(pool_key, pool.clone());
        Ok(pool)
    }
}

async fn build_pool(config: Config, pool_config: &PoolConfig) -> GatewayResult<Pool<ConnectionManager>> {
    let manager = ConnectionManager::new(config);
    Pool::builder()
        .max_size(pool_config.max_connections)
        .min_idle(Some(pool_config.min_connections))
        .connection_timeout(pool_config.connection_timeout)
        .build(manager)
        .await
        .map_err(|e| GatewayError::unexpected(format!("failed to build T-SQL connection pool: {e}")))
}

/// Kept for symmetry with the donor's builder API even though only `new` is exercised by the executor
/// factory today.
pub struct TsqlPoolBuilder {
    connection_string: String,
    base_app_name: String,
    pool_config: PoolConfig,
}

impl TsqlPoolBuilder {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self { connection_string: connection_string.into(), base_app_name: "querygate".to_string(), pool_config: PoolConfig::default() }
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.base_app_name = name.into();
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub async fn build(self) -> GatewayResult<Arc<TsqlPool>> {
        Ok(Arc::new(TsqlPool::new(&self.connection_string, self.base_app_name, self.pool_config).await?))
    }
}
