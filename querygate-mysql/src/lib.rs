//! MySQL dialect: builder, connection pool, and `QueryEngine` for querygate.

pub mod builder;
pub mod executor;
pub mod pool;

pub use builder::{build_delete_sql, build_find_sql, build_insert_batch, build_update_batch, build_upsert_batch, MysqlDialect};
pub use executor::{MysqlEngine, MysqlTransientClassifier};
pub use pool::{MysqlPool, MysqlPoolBuilder, PoolConfig};
