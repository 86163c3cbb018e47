//! PostgreSQL `QueryEngine`, grounded on the donor's `prax-postgres/src/engine.rs` acquire → bind →
//! execute shape, with real row-to-JSON decoding (the donor's own row deserialization is stubbed out
//! behind its `impl_from_row!` macro for concrete structs; this executor decodes arbitrary rows by
//! dispatching on `tokio_postgres::types::Type`) and `prax-postgres/src/error.rs`-style SQLSTATE
//! classification for retries.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;

use querygate_core::{
    execute_with_retry, ExecutionContext, FindResult, GatewayError, GatewayResult, MutationResult, Parameter,
    QueryEngine, RetryPolicy, UpsertResult,
};

use crate::pool::PgsqlPool;

pub struct PgsqlEngine {
    pool: std::sync::Arc<PgsqlPool>,
}

impl PgsqlEngine {
    pub fn new(pool: std::sync::Arc<PgsqlPool>) -> Self {
        Self { pool }
    }

    /// Routes to the per-OBO-identity pool when `ctx` carries a delegated identity, else the default
    /// pool (§4.4 "Per-user connection-pool isolation").
    fn pool_for(&self, ctx: &ExecutionContext) -> GatewayResult<Pool> {
        match &ctx.identity {
            Some(identity) => self.pool.pool_for_obo_identity(&identity.issuer, &identity.oid_or_sub),
            None => Ok(self.pool.default_pool().clone()),
        }
    }
}

/// Rewrites `@paramN` placeholders into PostgreSQL's positional `$i` syntax in the order `params`
/// supplies them, mirroring the donor mssql engine's own `convert_params` translation step.
fn rewrite_placeholders(sql: &str, params: &[Parameter]) -> String {
    let mut rewritten = sql.to_string();
    for (i, param) in params.iter().enumerate() {
        rewritten = rewritten.replace(param.name.as_str(), &format!("${}", i + 1));
    }
    rewritten
}

fn filter_value_to_sql(value: &querygate_core::FilterValue) -> Box<dyn ToSql + Sync> {
    match value {
        querygate_core::FilterValue::Null => Box::new(Option::<String>::None),
        querygate_core::FilterValue::Bool(b) => Box::new(*b),
        querygate_core::FilterValue::Int(n) => Box::new(*n),
        querygate_core::FilterValue::Float(f) => Box::new(*f),
        querygate_core::FilterValue::String(s) => Box::new(s.clone()),
        querygate_core::FilterValue::Json(v) => Box::new(v.clone()),
    }
}

fn row_to_json(row: &Row, skip_column: Option<&str>) -> GatewayResult<serde_json::Value> {
    let mut obj = serde_json::Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        if Some(column.name()) == skip_column {
            continue;
        }
        let value = match *column.type_() {
            Type::BOOL => row.get::<_, Option<bool>>(idx).map(serde_json::Value::Bool).unwrap_or(serde_json::Value::Null),
            Type::INT2 | Type::INT4 => row.get::<_, Option<i32>>(idx).map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
            Type::INT8 => row.get::<_, Option<i64>>(idx).map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
            Type::FLOAT4 | Type::FLOAT8 => row
                .get::<_, Option<f64>>(idx)
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Type::JSON | Type::JSONB => row.get::<_, Option<serde_json::Value>>(idx).unwrap_or(serde_json::Value::Null),
            Type::BYTEA => row
                .get::<_, Option<Vec<u8>>>(idx)
                .map(|b| serde_json::Value::String(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)))
                .unwrap_or(serde_json::Value::Null),
            _ => row.get::<_, Option<String>>(idx).map(serde_json::Value::String).unwrap_or(serde_json::Value::Null),
        };
        obj.insert(column.name().to_string(), value);
    }
    Ok(serde_json::Value::Object(obj))
}

#[async_trait]
impl QueryEngine for PgsqlEngine {
    async fn execute_find(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<FindResult> {
        let pool = self.pool_for(ctx)?;
        let policy = RetryPolicy::default();
        let row = execute_with_retry(&policy, &PgsqlTransientClassifier, |_n| async {
            let client = pool
                .get()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("PG-SQL pool checkout failed: {e}"), true))?;

            let rewritten = rewrite_placeholders(sql, params);
            let bound: Vec<Box<dyn ToSql + Sync>> = params.iter().map(|p| filter_value_to_sql(&p.value)).collect();
            let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref()).collect();

            client
                .query_opt(&rewritten, &refs)
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("PG-SQL query failed: {e}"), true))
        })
        .await?;

        let json = match row {
            Some(row) => row.get::<_, Option<serde_json::Value>>(0).unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::Null,
        };
        Ok(FindResult { json })
    }

    async fn execute_mutation(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<MutationResult> {
        let pool = self.pool_for(ctx)?;
        let policy = RetryPolicy::default();
        let rows = execute_with_retry(&policy, &PgsqlTransientClassifier, |_n| async {
            let client = pool
                .get()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("PG-SQL pool checkout failed: {e}"), true))?;

            let rewritten = rewrite_placeholders(sql, params);
            let bound: Vec<Box<dyn ToSql + Sync>> = params.iter().map(|p| filter_value_to_sql(&p.value)).collect();
            let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref()).collect();

            client
                .query(&rewritten, &refs)
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("PG-SQL mutation failed: {e}"), true))
        })
        .await?;

        let rows_affected = rows.len() as u64;
        let row = rows.first().map(|r| row_to_json(r, None)).transpose()?;
        Ok(MutationResult { row, rows_affected })
    }

    async fn execute_upsert(&self, statements: &[&str], params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<UpsertResult> {
        let pool = self.pool_for(ctx)?;
        let sql = statements.join("\n");
        let policy = RetryPolicy::default();
        let rows = execute_with_retry(&policy, &PgsqlTransientClassifier, |_n| async {
            let client = pool
                .get()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("PG-SQL pool checkout failed: {e}"), true))?;

            let rewritten = rewrite_placeholders(&sql, params);
            let bound: Vec<Box<dyn ToSql + Sync>> = params.iter().map(|p| filter_value_to_sql(&p.value)).collect();
            let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref()).collect();

            client
                .query(&rewritten, &refs)
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("PG-SQL upsert failed: {e}"), true))
        })
        .await?;

        let first = rows.first().ok_or_else(|| GatewayError::unexpected("upsert returned neither an update nor an insert row"))?;
        let is_update = first
            .try_get::<_, bool>("is_update")
            .map_err(|e| GatewayError::unexpected(format!("upsert row missing is_update column: {e}")))?;
        let row = Some(row_to_json(first, Some("is_update"))?);

        Ok(UpsertResult { row, is_update })
    }
}

/// PostgreSQL transient-error classification (§4.4): SQLSTATE class `40` (transaction rollback /
/// deadlock / serialization failure) and `08` (connection exception) are retried.
pub struct PgsqlTransientClassifier;

impl querygate_core::TransientErrorClassifier for PgsqlTransientClassifier {
    fn is_transient(&self, error: &GatewayError) -> bool {
        const TRANSIENT_MARKERS: &[&str] =
            &["deadlock", "could not serialize access", "connection reset", "connection closed", "connection timed out"];
        let message = error.message.to_lowercase();
        TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_core::structure::Parameter as CoreParameter;

    #[test]
    fn placeholder_rewrite_is_positional_in_param_order() {
        let params = vec![
            CoreParameter { name: "@param0".into(), value: querygate_core::FilterValue::Int(1), type_tag: None },
            CoreParameter { name: "@param1".into(), value: querygate_core::FilterValue::Int(2), type_tag: None },
        ];
        let sql = rewrite_placeholders("WHERE id = @param0 AND other = @param1", &params);
        assert_eq!(sql, "WHERE id = $1 AND other = $2");
    }

    #[test]
    fn serialization_failure_is_transient() {
        let err = GatewayError::database_operation_failed("could not serialize access due to concurrent update", true);
        assert!(PgsqlTransientClassifier.is_transient(&err));
    }

    #[test]
    fn syntax_error_is_not_transient() {
        let err = GatewayError::database_operation_failed("syntax error at or near", true);
        assert!(!PgsqlTransientClassifier.is_transient(&err));
    }
}
