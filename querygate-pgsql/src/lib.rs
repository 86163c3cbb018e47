//! PostgreSQL dialect: builder, connection pool, and `QueryEngine` for querygate.

pub mod builder;
pub mod executor;
pub mod pool;

pub use builder::{build_delete_sql, build_find_sql, build_insert_sql, build_update_sql, build_upsert_sql, PgsqlDialect};
pub use executor::{PgsqlEngine, PgsqlTransientClassifier};
pub use pool::{PgsqlPool, PgsqlPoolBuilder, PoolConfig};
