//! Document-store (MongoDB-compatible) builder, executor, and pool for the dialect-agnostic gateway
//! core. The odd one out among the four dialect crates: no SQL text is rendered at all, parameters are
//! resolved to literal values at build time instead of left as placeholders for the executor, and
//! upsert classification comes straight from the driver instead of a confirming select (see
//! `builder.rs`'s module doc for the full rationale).

pub mod builder;
pub mod executor;
pub mod pool;

pub use builder::{
    build_delete_filter, build_find_command, build_insert_document, build_update_command, build_upsert_command,
};
pub use executor::{DocDbEngine, DocDbTransientClassifier};
pub use pool::{DocDbPool, DocDbPoolBuilder, PoolConfig};
