//! MySQL connection pool, grounded on the donor's `prax-mysql/src/pool.rs` `MysqlPool`/`PoolConfig`/
//! `MysqlPoolBuilder` shape (`mysql_async::Pool` directly, since the crate ships its own pooling),
//! extended with per-OBO-identity pool derivation (§4.4) and multi-statement support for the upsert
//! batch built by [`crate::builder::build_upsert_batch`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};
use parking_lot::Mutex;

use querygate_core::{derive_pool_key, obo_application_identifier, GatewayError, GatewayResult};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub min_connections: usize,
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_connections: 10, min_connections: 1, connection_timeout: Duration::from_secs(30) }
    }
}

/// A single data source's MySQL pool, plus a side-table of per-user (OBO) pools keyed by pool key
/// (§4.4). MySQL has no `application_name` connection property, so the OBO identifier is carried as a
/// connection attribute instead (visible in `performance_schema.session_connect_attrs`).
pub struct MysqlPool {
    base_opts: Opts,
    pool_config: PoolConfig,
    base_app_name: String,
    default_pool: Pool,
    obo_pools: Mutex<HashMap<String, Pool>>,
}

impl MysqlPool {
    pub fn new(connection_string: &str, base_app_name: impl Into<String>, pool_config: PoolConfig) -> GatewayResult<Self> {
        let base_opts =
            Opts::from_url(connection_string).map_err(|e| GatewayError::unexpected(format!("invalid MY-SQL connection string: {e}")))?;
        let base_app_name = base_app_name.into();
        let default_pool = build_pool(base_opts.clone(), &pool_config, None);
        Ok(Self { base_opts, pool_config, base_app_name, default_pool, obo_pools: Mutex::new(HashMap::new()) })
    }

    pub fn default_pool(&self) -> &Pool {
        &self.default_pool
    }

    pub fn pool_for_obo_identity(&self, issuer: &str, oid_or_sub: &str) -> GatewayResult<Pool> {
        let pool_key = derive_pool_key(issuer, oid_or_sub);
        if let Some(existing) = self.obo_pools.lock().get(&pool_key).cloned() {
            return Ok(existing);
        }

        let app_identifier = obo_application_identifier(&self.base_app_name, &pool_key);
        let pool = build_pool(self.base_opts.clone(), &self.pool_config, Some(app_identifier));
        self.obo_pools.lock().insert(pool_key, pool.clone());
        Ok(pool)
    }
}

fn build_pool(opts: Opts, pool_config: &PoolConfig, app_identifier: Option<String>) -> Pool {
    let constraints = PoolConstraints::new(pool_config.min_connections, pool_config.max_connections)
        .unwrap_or_else(|| PoolConstraints::new(1, 10).expect("1..=10 is always a valid pool constraint"));
    let pool_opts = PoolOpts::default().with_constraints(constraints);

    let mut builder = OptsBuilder::from_opts(opts).pool_opts(pool_opts);
    if let Some(app_identifier) = app_identifier {
        let mut attrs = HashMap::new();
        attrs.insert("program_name".to_string(), app_identifier);
        builder = builder.connect_attrs(attrs);
    }
    // Enables the multi-statement capability the upsert batch's capture-and-confirm statements need.
    builder = builder.multi_statements(true);

    Pool::new(builder)
}

pub struct MysqlPoolBuilder {
    connection_string: String,
    base_app_name: String,
    pool_config: PoolConfig,
}

impl MysqlPoolBuilder {
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

    pub fn build(self) -> GatewayResult<Arc<MysqlPool>> {
        Ok(Arc::new(MysqlPool::new(&self.connection_string, self.base_app_name, self.pool_config)?))
    }
}
