//! # querygate-core
//!
//! Dialect-agnostic core of a database-to-API gateway: the predicate/column model, query structures,
//! the OData-to-predicate visitor, the authorization policy processor, keyset pagination, the
//! pagination cursor codec, and the shared rendering and executor scaffolding every SQL dialect crate
//! builds on.
//!
//! Dialect crates (`querygate-tsql`, `querygate-pgsql`, `querygate-mysql`, `querygate-docdb`) depend on
//! this crate, implement [`render::Dialect`] and [`executor::QueryEngine`], and supply their own SQL
//! builder and connection pool.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod ident;
pub mod keyset;
pub mod logging;
pub mod metadata;
pub mod model;
pub mod odata;
pub mod pagination;
pub mod policy;
pub mod render;
pub mod request;
pub mod structure;

pub use cache::{NoopCache, ResponseCache, TtlCache};
pub use config::{CacheConfig, ConfigHandle, DataSourceConfig, Dialect as ConfiguredDialect, GatewayConfig, UserDelegatedAuth};
pub use error::{GatewayError, GatewayResult, SubStatus};
pub use executor::{
    classify_upsert, derive_pool_key, execute_with_retry, obo_application_identifier, require_obo_identity,
    session_context_statements, ExecutionContext, FindResult, MutationResult, OboIdentity, QueryEngine, RetryPolicy,
    TransientErrorClassifier, UpsertResult,
};
pub use ident::Counter;
pub use keyset::{build_keyset_predicate, total_order_by};
pub use metadata::{ColumnDef, ColumnType, ForeignKeyDef, MetadataProvider, SourceDefinition, StaticMetadataProvider};
pub use model::{
    and_join, base_predicate, AggregationColumn, AggregationOp, Column, FilterValue, JoinStructure,
    KeysetPagePredicate, LabelledColumn, OrderByColumn, Predicate, PredicateOp, PredicateOperand, SortDirection,
};
pub use odata::{visit_filter, ClaimResolver, FilterNode, FilterOp};
pub use pagination::{CursorEntry, PaginationCursor, WireDirection};
pub use policy::{apply_compound_policy, apply_policy, PolicyProvider};
pub use render::{render_column, render_join, render_predicate};
pub use request::{NormalizedRequest, Operation, Principal};
pub use structure::{
    CompoundOperation, DeleteStructure, ElementalOperation, ExistsStructure, FindStructure, InsertStructure,
    Parameter, ParameterSink, PaginationSpec, QueryStructureHeader, UpdateStructure, UpsertStructure,
};

/// Convenient single-import surface for dialect crates and callers.
pub mod prelude {
    pub use crate::cache::{NoopCache, ResponseCache, TtlCache};
    pub use crate::config::{ConfigHandle, DataSourceConfig, GatewayConfig};
    pub use crate::error::{GatewayError, GatewayResult, SubStatus};
    pub use crate::executor::{
        classify_upsert, derive_pool_key, execute_with_retry, obo_application_identifier, ExecutionContext,
        FindResult, MutationResult, OboIdentity, QueryEngine, RetryPolicy, TransientErrorClassifier, UpsertResult,
    };
    pub use crate::metadata::{ColumnDef, MetadataProvider, SourceDefinition, StaticMetadataProvider};
    pub use crate::model::{Column, FilterValue, Predicate, PredicateOp, PredicateOperand, SortDirection};
    pub use crate::odata::{visit_filter, ClaimResolver, FilterNode};
    pub use crate::policy::{apply_compound_policy, apply_policy, PolicyProvider};
    pub use crate::render::{render_column, render_join, render_predicate, Dialect};
    pub use crate::request::{NormalizedRequest, Operation, Principal};
    pub use crate::structure::{ElementalOperation, FindStructure, ParameterSink, QueryStructureHeader};
}
