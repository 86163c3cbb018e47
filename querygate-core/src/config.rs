//! `GatewayConfig` (§1.1, §3.1): the data-source map plus OBO/session-context and cache settings,
//! loaded from TOML and held behind an atomically swappable pointer for hot-reload. Grounded on the
//! donor's `prax-postgres/src/config.rs` URL-parsing/builder shape, generalized from a single dialect's
//! connection config into a multi-data-source map with a dialect tag per entry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    Tsql,
    Pgsql,
    Mysql,
    DocDb,
}

/// On-behalf-of (OBO) / user-delegated auth settings for a single data source (§4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserDelegatedAuth {
    pub enabled: bool,
    pub database_audience: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataSourceConfig {
    pub dialect: Dialect,
    pub connection_template: String,
    #[serde(default)]
    pub set_session_context: bool,
    #[serde(default)]
    pub user_delegated_auth: UserDelegatedAuth,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GatewayConfig {
    pub data_sources: HashMap<String, DataSourceConfig>,
    pub cache: CacheConfig,
    /// Suppresses per-statement SQL debug logging and raw-message error propagation once the runtime
    /// config has been loaded past its initial bootstrap defaults (§4.8 `logging`).
    pub is_late_configured: bool,
}

impl GatewayConfig {
    pub fn from_toml_str(text: &str) -> GatewayResult<Self> {
        toml::from_str(text).map_err(|e| GatewayError::bad_request(format!("invalid configuration: {e}")))
    }

    pub fn data_source(&self, name: &str) -> GatewayResult<&DataSourceConfig> {
        self.data_sources.get(name).ok_or_else(|| GatewayError::data_source_not_found(name))
    }
}

/// Hot-reloadable config handle: readers take a cheap `Arc` clone, `reload` swaps the whole struct in
/// one write-lock acquisition rather than mutating fields in place (§1.1).
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<GatewayConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: GatewayConfig) -> Self {
        Self { inner: Arc::new(RwLock::new(Arc::new(config))) }
    }

    pub fn current(&self) -> Arc<GatewayConfig> {
        self.inner.read().clone()
    }

    pub fn reload(&self, config: GatewayConfig) {
        *self.inner.write() = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let text = r#"
            is-late-configured = true

            [cache]
            enabled = true
            ttl-seconds = 30

            [data-sources.books]
            dialect = "pgsql"
            connection-template = "postgresql://localhost/books"
            set-session-context = false

            [data-sources.books.user-delegated-auth]
            enabled = true
            database-audience = "https://database.windows.net/"
        "#;
        let config = GatewayConfig::from_toml_str(text).unwrap();
        assert!(config.is_late_configured);
        assert_eq!(config.cache.ttl_seconds, 30);
        let source = config.data_source("books").unwrap();
        assert_eq!(source.dialect, Dialect::Pgsql);
        assert!(source.user_delegated_auth.enabled);
    }

    #[test]
    fn unknown_data_source_is_not_found() {
        let config = GatewayConfig::default();
        let err = config.data_source("missing").unwrap_err();
        assert_eq!(err.sub_status(), crate::error::SubStatus::DataSourceNotFound);
    }

    #[test]
    fn reload_replaces_the_whole_struct_atomically() {
        let handle = ConfigHandle::new(GatewayConfig::default());
        assert!(handle.current().data_sources.is_empty());

        let mut next = GatewayConfig::default();
        next.data_sources.insert(
            "books".into(),
            DataSourceConfig {
                dialect: Dialect::Mysql,
                connection_template: "mysql://localhost/books".into(),
                set_session_context: false,
                user_delegated_auth: UserDelegatedAuth::default(),
            },
        );
        handle.reload(next);
        assert_eq!(handle.current().data_sources.len(), 1);
    }
}
