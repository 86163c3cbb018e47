//! Engine Factory (§4.5): routes a data source's declared [`Dialect`] to the matching
//! builder/executor pair, lazily standing up and caching the underlying connection pool per data
//! source name. Grounded on the donor's per-dialect client construction in
//! `prax-postgres`/`prax-mysql`/`prax-mssql`/`prax-mongodb`'s `*Client::new`, generalized here into one
//! dispatch point instead of a caller picking the crate to import by hand.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use querygate_core::{
    ConfigHandle, ConfiguredDialect as Dialect, ExecutionContext, FindResult, GatewayError, GatewayResult,
    MutationResult, Parameter, QueryEngine, UpsertResult,
};

/// The constructed engine for one data source, dispatching to whichever dialect crate was compiled in.
/// Unknown/uncompiled dialects never reach this enum — [`EngineFactory::engine_for`] rejects them with
/// `DataSourceNotFound` before a variant would need to exist for them.
pub enum Engine {
    #[cfg(feature = "tsql")]
    Tsql(querygate_tsql::TsqlEngine),
    #[cfg(feature = "pgsql")]
    Pgsql(querygate_pgsql::PgsqlEngine),
    #[cfg(feature = "mysql")]
    Mysql(querygate_mysql::MysqlEngine),
    #[cfg(feature = "docdb")]
    DocDb(querygate_docdb::DocDbEngine),
}

#[async_trait::async_trait]
impl QueryEngine for Engine {
    async fn execute_find(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<FindResult> {
        match self {
            #[cfg(feature = "tsql")]
            Engine::Tsql(e) => e.execute_find(sql, params, ctx).await,
            #[cfg(feature = "pgsql")]
            Engine::Pgsql(e) => e.execute_find(sql, params, ctx).await,
            #[cfg(feature = "mysql")]
            Engine::Mysql(e) => e.execute_find(sql, params, ctx).await,
            #[cfg(feature = "docdb")]
            Engine::DocDb(e) => e.execute_find(sql, params, ctx).await,
        }
    }

    async fn execute_mutation(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<MutationResult> {
        match self {
            #[cfg(feature = "tsql")]
            Engine::Tsql(e) => e.execute_mutation(sql, params, ctx).await,
            #[cfg(feature = "pgsql")]
            Engine::Pgsql(e) => e.execute_mutation(sql, params, ctx).await,
            #[cfg(feature = "mysql")]
            Engine::Mysql(e) => e.execute_mutation(sql, params, ctx).await,
            #[cfg(feature = "docdb")]
            Engine::DocDb(e) => e.execute_mutation(sql, params, ctx).await,
        }
    }

    async fn execute_upsert(&self, statements: &[&str], params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<UpsertResult> {
        match self {
            #[cfg(feature = "tsql")]
            Engine::Tsql(e) => e.execute_upsert(statements, params, ctx).await,
            #[cfg(feature = "pgsql")]
            Engine::Pgsql(e) => e.execute_upsert(statements, params, ctx).await,
            #[cfg(feature = "mysql")]
            Engine::Mysql(e) => e.execute_upsert(statements, params, ctx).await,
            #[cfg(feature = "docdb")]
            Engine::DocDb(e) => e.execute_upsert(statements, params, ctx).await,
        }
    }
}

/// Builds and caches one [`Engine`] (and its underlying connection pool) per data source name, keyed
/// off `GatewayConfig`'s dialect tag (§4.4 "Connection acquisition", §4.5).
pub struct EngineFactory {
    config: ConfigHandle,
    engines: Mutex<HashMap<String, Arc<Engine>>>,
}

impl EngineFactory {
    pub fn new(config: ConfigHandle) -> Self {
        Self { config, engines: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached engine for `data_source_name`, building it on first access. Fails with
    /// `DataSourceNotFound` when the name is absent from configuration, or when its declared dialect's
    /// crate was not compiled into this build.
    pub async fn engine_for(&self, data_source_name: &str) -> GatewayResult<Arc<Engine>> {
        if let Some(engine) = self.engines.lock().get(data_source_name) {
            return Ok(engine.clone());
        }

        let config = self.config.current();
        let source = config.data_source(data_source_name)?;
        let base_app_name = format!("querygate-{data_source_name}");
        let engine = Arc::new(self.build_engine(source.dialect, &source.connection_template, &base_app_name, data_source_name).await?);

        self.engines.lock().insert(data_source_name.to_string(), engine.clone());
        Ok(engine)
    }

    async fn build_engine(&self, dialect: Dialect, connection_template: &str, base_app_name: &str, data_source_name: &str) -> GatewayResult<Engine> {
        match dialect {
            #[cfg(feature = "tsql")]
            Dialect::Tsql => {
                let pool = querygate_tsql::TsqlPool::new(connection_template, base_app_name, querygate_tsql::PoolConfig::default()).await?;
                Ok(Engine::Tsql(querygate_tsql::TsqlEngine::new(Arc::new(pool))))
            }
            #[cfg(not(feature = "tsql"))]
            Dialect::Tsql => Err(GatewayError::data_source_not_found(data_source_name)),

            #[cfg(feature = "pgsql")]
            Dialect::Pgsql => {
                let pool = querygate_pgsql::PgsqlPool::new(connection_template, base_app_name, querygate_pgsql::PoolConfig::default()).await?;
                Ok(Engine::Pgsql(querygate_pgsql::PgsqlEngine::new(Arc::new(pool))))
            }
            #[cfg(not(feature = "pgsql"))]
            Dialect::Pgsql => Err(GatewayError::data_source_not_found(data_source_name)),

            #[cfg(feature = "mysql")]
            Dialect::Mysql => {
                let pool = querygate_mysql::MysqlPool::new(connection_template, base_app_name, querygate_mysql::PoolConfig::default())?;
                Ok(Engine::Mysql(querygate_mysql::MysqlEngine::new(Arc::new(pool))))
            }
            #[cfg(not(feature = "mysql"))]
            Dialect::Mysql => Err(GatewayError::data_source_not_found(data_source_name)),

            #[cfg(feature = "docdb")]
            Dialect::DocDb => {
                let pool = querygate_docdb::DocDbPool::new(connection_template, data_source_name, &querygate_docdb::PoolConfig::default()).await?;
                Ok(Engine::DocDb(querygate_docdb::DocDbEngine::new(Arc::new(pool))))
            }
            #[cfg(not(feature = "docdb"))]
            Dialect::DocDb => Err(GatewayError::data_source_not_found(data_source_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_core::{DataSourceConfig, GatewayConfig, SubStatus, UserDelegatedAuth};

    #[tokio::test]
    async fn unknown_data_source_name_is_not_found() {
        let factory = EngineFactory::new(ConfigHandle::new(GatewayConfig::default()));
        let err = factory.engine_for("missing").await.unwrap_err();
        assert_eq!(err.sub_status(), SubStatus::DataSourceNotFound);
    }

    #[tokio::test]
    async fn malformed_connection_template_surfaces_as_an_error_not_a_panic() {
        let mut config = GatewayConfig::default();
        config.data_sources.insert(
            "books".into(),
            DataSourceConfig {
                dialect: Dialect::Pgsql,
                connection_template: "not-a-valid-url".into(),
                set_session_context: false,
                user_delegated_auth: UserDelegatedAuth::default(),
            },
        );
        let factory = EngineFactory::new(ConfigHandle::new(config));
        assert!(factory.engine_for("books").await.is_err());
    }
}
