//! PostgreSQL connection pool, grounded on the donor's `prax-postgres/src/pool.rs` `PgPool`/`PoolConfig`/
//! `PgPoolBuilder` shape (`deadpool-postgres` over `tokio-postgres`), extended with per-OBO-identity pool
//! derivation (§4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use parking_lot::Mutex;
use tokio_postgres::NoTls;

use querygate_core::{derive_pool_key, obo_application_identifier, GatewayError, GatewayResult};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_connections: 10, connection_timeout: Duration::from_secs(30) }
    }
}

pub struct PgsqlPool {
    base_config: tokio_postgres::Config,
    pool_config: PoolConfig,
    base_app_name: String,
    default_pool: Pool,
    obo_pools: Mutex<HashMap<String, Pool>>,
}

impl PgsqlPool {
    pub async fn new(connection_string: &str, base_app_name: impl Into<String>, pool_config: PoolConfig) -> GatewayResult<Self> {
        let base_config: tokio_postgres::Config = connection_string
            .parse()
            .map_err(|e| GatewayError::unexpected(format!("invalid PG-SQL connection string: {e}")))?;
        let base_app_name = base_app_name.into();
        let default_pool = build_pool(base_config.clone(), &pool_config)?;
        Ok(Self { base_config, pool_config, base_app_name, default_pool, obo_pools: Mutex::new(HashMap::new()) })
    }

    pub fn default_pool(&self) -> &Pool {
        &self.default_pool
    }

    pub fn pool_for_obo_identity(&self, issuer: &str, oid_or_sub: &str) -> GatewayResult<Pool> {
        let pool_key = derive_pool_key(issuer, oid_or_sub);
        if let Some(existing) = self.obo_pools.lock().get(&pool_key).cloned() {
            return Ok(existing);
        }

        let mut config = self.base_config.clone();
        config.application_name(obo_application_identifier(&self.base_app_name, &pool_key));

        let pool = build_pool(config, &self.pool_config)?;
        self.obo_pools.lock().insert(pool_key, pool.clone());
        Ok(pool)
    }
}

fn build_pool(config: tokio_postgres::Config, pool_config: &PoolConfig) -> GatewayResult<Pool> {
    let manager_config = ManagerConfig { recycling_method: RecyclingMethod::Fast };
    let manager = Manager::from_config(config, NoTls, manager_config);
    Pool::builder(manager)
        .max_size(pool_config.max_connections)
        .wait_timeout(Some(pool_config.connection_timeout))
        .build()
        .map_err(|e| GatewayError::unexpected(format!("failed to build PG-SQL connection pool: {e}")))
}

pub struct PgsqlPoolBuilder {
    connection_string: String,
    base_app_name: String,
    pool_config: PoolConfig,
}

impl PgsqlPoolBuilder {
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

    pub async fn build(self) -> GatewayResult<Arc<PgsqlPool>> {
        Ok(Arc::new(PgsqlPool::new(&self.connection_string, self.base_app_name, self.pool_config).await?))
    }
}
