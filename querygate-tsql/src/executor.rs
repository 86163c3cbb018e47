//! T-SQL `QueryEngine`, grounded on the donor's `prax-mssql/src/engine.rs` acquire → bind → execute
//! shape, but with real row-to-JSON deserialization in place of that file's placeholder ("would
//! deserialize rows into Vec<T>") stub, and the `prax-mssql/src/error.rs` SQL-Server-error-number
//! classification generalized into a [`TransientErrorClassifier`].

use async_trait::async_trait;
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use smol_str::SmolStr;
use tiberius::{ColumnType, Query, Row};

use querygate_core::{
    execute_with_retry, session_context_statements, ExecutionContext, FindResult, GatewayError, GatewayResult,
    MutationResult, Parameter, QueryEngine, RetryPolicy, UpsertResult,
};

use crate::pool::TsqlPool;

pub struct TsqlEngine {
    pool: std::sync::Arc<TsqlPool>,
}

impl TsqlEngine {
    pub fn new(pool: std::sync::Arc<TsqlPool>) -> Self {
        Self { pool }
    }

    /// Routes to the per-OBO-identity pool when `ctx` carries a delegated identity, else the default
    /// pool (§4.4 "Per-user connection-pool isolation").
    async fn pool_for(&self, ctx: &ExecutionContext) -> GatewayResult<Pool<ConnectionManager>> {
        match &ctx.identity {
            Some(identity) => self.pool.pool_for_obo_identity(&identity.issuer, &identity.oid_or_sub).await,
            None => Ok(self.pool.default_pool().clone()),
        }
    }
}

/// Builds the `sp_set_session_context` prelude statements for `ctx`'s identity (§4.4, T-SQL only) along
/// with the extra bind parameters they need, freshly numbered so they never collide with the caller's
/// own `@paramN` placeholders.
fn session_context_prelude(ctx: &ExecutionContext) -> (Vec<String>, Vec<Parameter>) {
    let Some(identity) = &ctx.identity else { return (Vec::new(), Vec::new()) };
    if identity.session_claims.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let mut extra_params = Vec::new();
    let mut counter = 0usize;
    let statements = session_context_statements(&identity.session_claims, |value| {
        let name: SmolStr = format!("@session_ctx_param{counter}").into();
        extra_params.push(Parameter { name: name.clone(), value, type_tag: None });
        counter += 1;
        name
    });
    (statements, extra_params)
}

/// Prefixes `sql` with the session-context prelude (if any) and prepends its bind parameters to
/// `params`, so the batch text and the bind-parameter order stay in lockstep.
fn with_session_context(sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> (String, Vec<Parameter>) {
    let (prelude, mut all_params) = session_context_prelude(ctx);
    all_params.extend(params.iter().cloned());
    if prelude.is_empty() {
        (sql.to_string(), all_params)
    } else {
        (format!("{}\n{sql}", prelude.join("\n")), all_params)
    }
}

fn bind_params<'a>(query: &mut Query<'a>, params: &'a [Parameter]) {
    for p in params {
        match &p.value {
            querygate_core::FilterValue::Null => query.bind(Option::<&str>::None),
            querygate_core::FilterValue::Bool(b) => query.bind(*b),
            querygate_core::FilterValue::Int(n) => query.bind(*n),
            querygate_core::FilterValue::Float(f) => query.bind(*f),
            querygate_core::FilterValue::String(s) => query.bind(s.as_str()),
            querygate_core::FilterValue::Json(v) => query.bind(v.to_string()),
        }
    }
}

/// Converts one tiberius row into a `{column_name: value}` JSON object, dispatching on the wire column
/// type the way the donor's engine only sketched (§4.4 "row_set" reader handler).
fn row_to_json(row: &Row) -> GatewayResult<serde_json::Value> {
    let mut obj = serde_json::Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.column_type() {
            ColumnType::Bit | ColumnType::Bitn => row
                .try_get::<bool, _>(idx)
                .map_err(|e| GatewayError::unexpected(format!("row decode failed: {e}")))?
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null),
            ColumnType::Int1 | ColumnType::Int2 | ColumnType::Int4 => row
                .try_get::<i32, _>(idx)
                .map_err(|e| GatewayError::unexpected(format!("row decode failed: {e}")))?
                .map(|n| serde_json::Value::from(n))
                .unwrap_or(serde_json::Value::Null),
            ColumnType::Int8 => row
                .try_get::<i64, _>(idx)
                .map_err(|e| GatewayError::unexpected(format!("row decode failed: {e}")))?
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            ColumnType::Floatn | ColumnType::Float4 | ColumnType::Float8 => row
                .try_get::<f64, _>(idx)
                .map_err(|e| GatewayError::unexpected(format!("row decode failed: {e}")))?
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ColumnType::BigVarBin | ColumnType::BigBinary => row
                .try_get::<&[u8], _>(idx)
                .map_err(|e| GatewayError::unexpected(format!("row decode failed: {e}")))?
                .map(|b| serde_json::Value::String(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)))
                .unwrap_or(serde_json::Value::Null),
            _ => row
                .try_get::<&str, _>(idx)
                .map_err(|e| GatewayError::unexpected(format!("row decode failed: {e}")))?
                .map(|s| serde_json::Value::String(s.to_string()))
                .unwrap_or(serde_json::Value::Null),
        };
        obj.insert(column.name().to_string(), value);
    }
    Ok(serde_json::Value::Object(obj))
}

/// T-SQL splits a `FOR JSON` payload across multiple rows of a single column once it exceeds roughly
/// 2033 characters; the "json_string" reader handler (§4.4) concatenates them back together before
/// parsing. `FOR JSON PATH` over zero matching rows produces zero rows of output text, which means
/// "no rows" for a find-many (§4.2 scenario 2, must render `[]`) and "not found" for a find-one
/// (`WITHOUT_ARRAY_WRAPPER`, must render `null`) — `singleton` disambiguates the two.
fn concat_json_column(rows: &[Row], singleton: bool) -> GatewayResult<serde_json::Value> {
    let mut text = String::new();
    for row in rows {
        if let Some(chunk) = row
            .try_get::<&str, _>(0)
            .map_err(|e| GatewayError::unexpected(format!("JSON chunk decode failed: {e}")))?
        {
            text.push_str(chunk);
        }
    }
    if text.is_empty() {
        return Ok(if singleton { serde_json::Value::Null } else { serde_json::Value::Array(Vec::new()) });
    }
    serde_json::from_str(&text).map_err(|e| GatewayError::unexpected(format!("malformed FOR JSON payload: {e}")))
}

#[async_trait]
impl QueryEngine for TsqlEngine {
    async fn execute_find(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<FindResult> {
        let pool = self.pool_for(ctx).await?;
        let (batch, all_params) = with_session_context(sql, params, ctx);
        let policy = RetryPolicy::default();

        let rows = execute_with_retry(&policy, &TsqlTransientClassifier, |_n| async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("T-SQL pool checkout failed: {e}"), true))?;

            let mut query = Query::new(batch.as_str());
            bind_params(&mut query, &all_params);

            let stream = query
                .query(&mut conn)
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("T-SQL query failed: {e}"), true))?;
            stream
                .into_first_result()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("T-SQL result read failed: {e}"), true))
        })
        .await?;

        Ok(FindResult { json: concat_json_column(&rows, ctx.singleton)? })
    }

    async fn execute_mutation(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<MutationResult> {
        let pool = self.pool_for(ctx).await?;
        let (batch, all_params) = with_session_context(sql, params, ctx);
        let policy = RetryPolicy::default();

        let rows = execute_with_retry(&policy, &TsqlTransientClassifier, |_n| async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("T-SQL pool checkout failed: {e}"), true))?;

            let mut query = Query::new(batch.as_str());
            bind_params(&mut query, &all_params);

            let stream = query
                .query(&mut conn)
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("T-SQL mutation failed: {e}"), true))?;
            stream
                .into_first_result()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("T-SQL result read failed: {e}"), true))
        })
        .await?;

        let rows_affected = rows.len() as u64;
        let row = rows.first().map(row_to_json).transpose()?;
        Ok(MutationResult { row, rows_affected })
    }

    async fn execute_upsert(&self, statements: &[&str], params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<UpsertResult> {
        let pool = self.pool_for(ctx).await?;
        let joined = statements.join("\n");
        let (batch, all_params) = with_session_context(&joined, params, ctx);
        let policy = RetryPolicy::default();

        let result_sets = execute_with_retry(&policy, &TsqlTransientClassifier, |_n| async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("T-SQL pool checkout failed: {e}"), true))?;

            let mut query = Query::new(batch.as_str());
            bind_params(&mut query, &all_params);

            let stream = query
                .query(&mut conn)
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("T-SQL upsert batch failed: {e}"), true))?;
            stream
                .into_results()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("T-SQL result read failed: {e}"), true))
        })
        .await?;

        let count_rows = result_sets.first().ok_or_else(|| GatewayError::unexpected("upsert batch returned no count result set"))?;
        let n_pk: u32 = count_rows
            .first()
            .and_then(|row| row.try_get::<i32, _>(0).ok().flatten())
            .map(|n| n as u32)
            .ok_or_else(|| GatewayError::unexpected("upsert count result set had no scalar value"))?;

        let empty_rows: Vec<Row> = Vec::new();
        let merge_rows = result_sets.get(1).unwrap_or(&empty_rows);
        let is_update = querygate_core::classify_upsert(n_pk, merge_rows.len(), None)?;
        let row = merge_rows.first().map(row_to_json).transpose()?;

        Ok(UpsertResult { row, is_update })
    }
}

/// SQL Server transient-error classification (§4.4): deadlock victim (1205), connection reset, and
/// timeout are retried; everything else (constraint violations, syntax errors, auth failures) is not.
pub struct TsqlTransientClassifier;

impl querygate_core::TransientErrorClassifier for TsqlTransientClassifier {
    fn is_transient(&self, error: &GatewayError) -> bool {
        const TRANSIENT_MARKERS: &[&str] = &["deadlock", "timeout", "connection reset", "connection was forcibly closed"];
        let message = error.message.to_lowercase();
        TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_core::SubStatus;

    #[test]
    fn deadlock_message_is_transient() {
        let err = GatewayError::database_operation_failed("Transaction was deadlocked on lock resources", true);
        assert!(TsqlTransientClassifier.is_transient(&err));
    }

    #[test]
    fn constraint_violation_is_not_transient() {
        let err = GatewayError::database_operation_failed("Violation of UNIQUE KEY constraint", true);
        assert!(!TsqlTransientClassifier.is_transient(&err));
    }

    #[test]
    fn classify_upsert_is_reexported_and_usable_here() {
        assert!(matches!(
            querygate_core::classify_upsert(1, 0, None).unwrap_err().sub_status(),
            SubStatus::DatabasePolicyFailure
        ));
    }

    #[test]
    fn zero_rows_of_for_json_text_is_empty_array_for_find_many() {
        let rows: Vec<Row> = Vec::new();
        assert_eq!(concat_json_column(&rows, false).unwrap(), serde_json::Value::Array(vec![]));
    }

    #[test]
    fn zero_rows_of_for_json_text_is_null_for_find_one() {
        let rows: Vec<Row> = Vec::new();
        assert_eq!(concat_json_column(&rows, true).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn session_context_prelude_is_empty_without_an_identity() {
        let ctx = ExecutionContext::find_many();
        let (statements, params) = session_context_prelude(&ctx);
        assert!(statements.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn session_context_prelude_numbers_params_per_claim() {
        let ctx = ExecutionContext::find_many().with_identity(querygate_core::OboIdentity {
            issuer: "https://issuer".into(),
            oid_or_sub: "user-1".into(),
            session_claims: vec![
                ("tenant_id".into(), querygate_core::FilterValue::from("acme")),
                ("department".into(), querygate_core::FilterValue::from("eng")),
            ],
        });
        let (statements, params) = session_context_prelude(&ctx);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("sp_set_session_context 'tenant_id', @session_ctx_param0"));
        assert!(statements[1].contains("sp_set_session_context 'department', @session_ctx_param1"));
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name.as_str(), "@session_ctx_param0");
        assert_eq!(params[1].name.as_str(), "@session_ctx_param1");
    }

    #[test]
    fn with_session_context_prepends_prelude_params_before_the_caller_s_own() {
        let ctx = ExecutionContext::find_many().with_identity(querygate_core::OboIdentity {
            issuer: "https://issuer".into(),
            oid_or_sub: "user-1".into(),
            session_claims: vec![("tenant_id".into(), querygate_core::FilterValue::from("acme"))],
        });
        let params = vec![Parameter { name: "@param0".into(), value: querygate_core::FilterValue::Int(7), type_tag: None }];
        let (sql, all_params) = with_session_context("SELECT * FROM books WHERE id = @param0", &params, &ctx);
        assert!(sql.starts_with("EXEC sp_set_session_context"));
        assert!(sql.ends_with("SELECT * FROM books WHERE id = @param0"));
        assert_eq!(all_params.len(), 2);
        assert_eq!(all_params[0].name.as_str(), "@session_ctx_param0");
        assert_eq!(all_params[1].name.as_str(), "@param0");
    }
}
