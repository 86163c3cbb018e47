//! # querygate
//!
//! A database-to-API gateway: translates a normalized entity request into a single parameterized SQL
//! statement (or, for a document store, a BSON filter/update command), runs it against one of several
//! supported backends, and returns JSON.
//!
//! `querygate-core` carries the dialect-agnostic pipeline — predicate/column model, query structures,
//! the OData-to-predicate visitor, the authorization policy processor, pagination, and the shared
//! executor scaffolding. Each backend lives in its own crate behind a feature flag:
//!
//! - `tsql` — Microsoft SQL Server (`querygate-tsql`)
//! - `pgsql` — PostgreSQL (`querygate-pgsql`), enabled by default
//! - `mysql` — MySQL (`querygate-mysql`)
//! - `docdb` — a MongoDB-compatible document store (`querygate-docdb`)
//!
//! [`engine::EngineFactory`] is the single entry point that ties a configured data source to its
//! backend: it looks up the data source's declared dialect, lazily builds the matching connection pool,
//! and hands back a `querygate_core::QueryEngine` trait object.

pub mod engine;

pub use engine::{Engine, EngineFactory};
pub use querygate_core::prelude::*;
pub use querygate_core::ConfiguredDialect;

#[cfg(feature = "tsql")]
pub use querygate_tsql as tsql;
#[cfg(feature = "pgsql")]
pub use querygate_pgsql as pgsql;
#[cfg(feature = "mysql")]
pub use querygate_mysql as mysql;
#[cfg(feature = "docdb")]
pub use querygate_docdb as docdb;
