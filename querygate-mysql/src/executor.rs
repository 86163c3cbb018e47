//! MySQL `QueryEngine`, grounded on the donor's `prax-mysql/src/engine.rs` acquire → bind → execute
//! shape and its `types.rs::from_mysql_value` row decoder (rewritten here to use the real `base64`
//! crate instead of the donor's hand-rolled encoder), with MySQL error-number-based transient
//! classification (§4.4).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mysql_async::prelude::Queryable;
use mysql_async::{Params, Pool, Row, Value};

use querygate_core::{
    execute_with_retry, ExecutionContext, FilterValue, FindResult, GatewayError, GatewayResult, MutationResult,
    Parameter, QueryEngine, RetryPolicy, UpsertResult,
};

use crate::pool::MysqlPool;

pub struct MysqlEngine {
    pool: std::sync::Arc<MysqlPool>,
}

impl MysqlEngine {
    pub fn new(pool: std::sync::Arc<MysqlPool>) -> Self {
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

/// Rewrites `@paramN` placeholders into MySQL's positional `?` syntax, in the order `params` supplies
/// them — mirroring the donor mssql engine's own `convert_params` translation step, but with MySQL's
/// plain, unindexed placeholder instead of PostgreSQL's `$i`.
fn rewrite_placeholders(sql: &str, params: &[Parameter]) -> String {
    let mut rewritten = sql.to_string();
    for param in params {
        rewritten = rewritten.replace(param.name.as_str(), "?");
    }
    rewritten
}

fn filter_value_to_mysql(value: &FilterValue) -> Value {
    match value {
        FilterValue::Null => Value::NULL,
        FilterValue::Bool(b) => Value::Int(*b as i64),
        FilterValue::Int(n) => Value::Int(*n),
        FilterValue::Float(f) => Value::Double(*f),
        FilterValue::String(s) => Value::Bytes(s.as_bytes().to_vec()),
        FilterValue::Json(v) => Value::Bytes(v.to_string().into_bytes()),
    }
}

/// Decodes a raw `mysql_async::Value` the way the donor's `from_mysql_value` does: bytes are tried as
/// UTF-8 first, then as embedded JSON (since `JSON_OBJECT`/`JSON_ARRAYAGG` results arrive as text), and
/// only base64-encoded when they're not valid UTF-8 at all.
fn from_mysql_value(value: Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)),
            Err(e) => serde_json::Value::String(BASE64.encode(e.into_bytes())),
        },
        Value::Int(n) => serde_json::Value::from(n),
        Value::UInt(n) => serde_json::Value::from(n),
        Value::Float(f) => serde_json::Number::from_f64(f as f64).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        Value::Double(f) => serde_json::Number::from_f64(f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        Value::Date(year, month, day, hour, minute, second, micro) => {
            serde_json::Value::String(format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"))
        }
        Value::Time(is_neg, days, hours, minutes, seconds, micro) => {
            let sign = if is_neg { "-" } else { "" };
            serde_json::Value::String(format!("{sign}{days}d{hours:02}:{minutes:02}:{seconds:02}.{micro:06}"))
        }
    }
}

fn row_to_json(row: &Row, skip_column: Option<&str>) -> GatewayResult<serde_json::Value> {
    let mut obj = serde_json::Map::new();
    for (idx, column) in row.columns_ref().iter().enumerate() {
        let name = column.name_str().to_string();
        if Some(name.as_str()) == skip_column {
            continue;
        }
        let value: Option<Value> = row.get(idx);
        obj.insert(name, from_mysql_value(value.unwrap_or(Value::NULL)));
    }
    Ok(serde_json::Value::Object(obj))
}

fn bind(params: &[Parameter]) -> Params {
    if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.iter().map(|p| filter_value_to_mysql(&p.value)).collect())
    }
}

#[async_trait]
impl QueryEngine for MysqlEngine {
    async fn execute_find(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<FindResult> {
        let pool = self.pool_for(ctx)?;
        let policy = RetryPolicy::default();
        let row: Option<Row> = execute_with_retry(&policy, &MysqlTransientClassifier, |_n| async {
            let mut conn = pool
                .get_conn()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("MY-SQL pool checkout failed: {e}"), true))?;

            let rewritten = rewrite_placeholders(sql, params);
            conn.exec_first(rewritten, bind(params))
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("MY-SQL query failed: {e}"), true))
        })
        .await?;

        let json = match row {
            Some(row) => {
                let raw: Option<Value> = row.get(0);
                from_mysql_value(raw.unwrap_or(Value::NULL))
            }
            None => serde_json::Value::Null,
        };
        Ok(FindResult { json })
    }

    async fn execute_mutation(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<MutationResult> {
        let pool = self.pool_for(ctx)?;
        let policy = RetryPolicy::default();
        let rows_affected = execute_with_retry(&policy, &MysqlTransientClassifier, |_n| async {
            let mut conn = pool
                .get_conn()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("MY-SQL pool checkout failed: {e}"), true))?;

            let rewritten = rewrite_placeholders(sql, params);
            conn.exec_drop(rewritten, bind(params))
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("MY-SQL mutation failed: {e}"), true))?;
            Ok(conn.affected_rows())
        })
        .await?;
        Ok(MutationResult { row: None, rows_affected })
    }

    /// Runs the insert/update statement, then the `ROW_COUNT()`-guarded confirming select supplied as
    /// the batch's second statement (§4.2) — neither statement takes the row's own bind parameters a
    /// second time, since the confirming select only references `LAST_INSERT_ID()`/the predicate
    /// already bound in the first statement's params.
    async fn execute_upsert(&self, statements: &[&str], params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<UpsertResult> {
        let pool = self.pool_for(ctx)?;
        let policy = RetryPolicy::default();
        let row: Row = execute_with_retry(&policy, &MysqlTransientClassifier, |_n| async {
            let mut conn = pool
                .get_conn()
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("MY-SQL pool checkout failed: {e}"), true))?;

            let rewritten_first = rewrite_placeholders(statements[0], params);
            conn.exec_drop(rewritten_first, bind(params))
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("MY-SQL upsert failed: {e}"), true))?;

            for capture in &statements[1..statements.len() - 1] {
                conn.query_drop(*capture)
                    .await
                    .map_err(|e| GatewayError::database_operation_failed(format!("MY-SQL upsert capture failed: {e}"), true))?;
            }

            let confirm = statements.last().expect("upsert batch always has a confirming select");
            conn.query_first(*confirm)
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("MY-SQL upsert confirm failed: {e}"), true))?
                .ok_or_else(|| GatewayError::unexpected("upsert returned neither an update nor an insert row"))
        })
        .await?;

        let is_update_idx = row
            .columns_ref()
            .iter()
            .position(|c| c.name_str() == "is_update")
            .ok_or_else(|| GatewayError::unexpected("upsert row missing is_update column"))?;
        let is_update = matches!(row.as_ref(is_update_idx), Some(mysql_async::Value::Int(1)));

        let json = row_to_json(&row, Some("is_update"))?;
        Ok(UpsertResult { row: Some(json), is_update })
    }
}

/// MySQL transient-error classification (§4.4): deadlock (1213), lock wait timeout (1205), and
/// connection-loss errors are retried.
pub struct MysqlTransientClassifier;

impl querygate_core::TransientErrorClassifier for MysqlTransientClassifier {
    fn is_transient(&self, error: &GatewayError) -> bool {
        const TRANSIENT_MARKERS: &[&str] =
            &["deadlock found", "lock wait timeout exceeded", "1213", "1205", "server has gone away", "broken pipe"];
        let message = error.message.to_lowercase();
        TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_core::structure::Parameter as CoreParameter;

    #[test]
    fn placeholder_rewrite_is_unindexed() {
        let params = vec![
            CoreParameter { name: "@param0".into(), value: FilterValue::Int(1), type_tag: None },
            CoreParameter { name: "@param1".into(), value: FilterValue::Int(2), type_tag: None },
        ];
        let sql = rewrite_placeholders("WHERE id = @param0 AND other = @param1", &params);
        assert_eq!(sql, "WHERE id = ? AND other = ?");
    }

    #[test]
    fn deadlock_is_transient() {
        let err = GatewayError::database_operation_failed("Deadlock found when trying to get lock", true);
        assert!(MysqlTransientClassifier.is_transient(&err));
    }

    #[test]
    fn duplicate_key_is_not_transient() {
        let err = GatewayError::database_operation_failed("Duplicate entry '7' for key 'PRIMARY'", true);
        assert!(!MysqlTransientClassifier.is_transient(&err));
    }

    #[test]
    fn embedded_json_text_is_parsed_back_into_a_value() {
        let decoded = from_mysql_value(Value::Bytes(br#"{"a":1}"#.to_vec()));
        assert_eq!(decoded, serde_json::json!({"a": 1}));
    }

    #[test]
    fn non_utf8_bytes_fall_back_to_base64() {
        let decoded = from_mysql_value(Value::Bytes(vec![0xff, 0xfe]));
        assert_eq!(decoded, serde_json::Value::String(BASE64.encode([0xff, 0xfe])));
    }
}
