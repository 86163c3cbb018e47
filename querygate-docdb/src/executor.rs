//! Document-store `QueryEngine`: parses the builder's JSON command text back into a [`bson::Document`]
//! and runs it against the `mongodb` driver, grounded on the donor's `prax-mongodb/src/engine.rs`
//! `build_filter` convention of treating `sql: &str` as JSON-encoded filter text, and on
//! `prax-mongodb/src/client.rs`'s trailing-`Option<_>`-argument call style (mongodb 2.x predates the
//! fluent per-call options builders mongodb 3.x introduced).
//!
//! MongoDB tells insert from update apart natively via `UpdateResult::upserted_id`, so unlike the SQL
//! dialects there's no count-then-branch state machine here (§4.7) — `execute_upsert` reads the driver's
//! own result instead of classifying a confirming select.

use async_trait::async_trait;
use bson::Document;
use futures::stream::TryStreamExt;
use mongodb::options::{FindOneOptions, FindOptions, UpdateOptions};
use mongodb::Collection;

use querygate_core::{
    execute_with_retry, ExecutionContext, FindResult, GatewayError, GatewayResult, MutationResult, Parameter,
    QueryEngine, RetryPolicy, UpsertResult,
};

use crate::pool::DocDbPool;

pub struct DocDbEngine {
    pool: std::sync::Arc<DocDbPool>,
}

impl DocDbEngine {
    pub fn new(pool: std::sync::Arc<DocDbPool>) -> Self {
        Self { pool }
    }

    /// Routes to the per-OBO-identity database when `ctx` carries a delegated identity, else the
    /// default database (§4.4 "Per-user connection-pool isolation" applied to MongoDB's per-`Client`
    /// pooling).
    async fn collection_for(&self, ctx: &ExecutionContext, name: &str) -> GatewayResult<Collection<Document>> {
        match &ctx.identity {
            Some(identity) => {
                let database = self.pool.database_for_obo_identity(&identity.issuer, &identity.oid_or_sub).await?;
                Ok(database.collection(name))
            }
            None => Ok(self.pool.collection(name)),
        }
    }
}

/// Parses a builder-emitted command, mirroring the donor's own `sql.starts_with('{')` convention for
/// recognizing JSON-encoded filter text carried through the `sql: &str` parameter.
fn parse_command(sql: &str) -> GatewayResult<serde_json::Value> {
    serde_json::from_str(sql).map_err(|e| GatewayError::unexpected(format!("malformed document-store command: {e}")))
}

fn collection_name(command: &serde_json::Value) -> GatewayResult<&str> {
    command["collection"]
        .as_str()
        .ok_or_else(|| GatewayError::unexpected("document-store command is missing its collection name"))
}

fn bson_document(value: &serde_json::Value) -> GatewayResult<Document> {
    bson::to_document(value).map_err(|e| GatewayError::unexpected(format!("could not convert to a BSON document: {e}")))
}

fn bson_to_json(doc: Document) -> GatewayResult<serde_json::Value> {
    serde_json::to_value(doc).map_err(|e| GatewayError::unexpected(format!("could not convert BSON to JSON: {e}")))
}

#[async_trait]
impl QueryEngine for DocDbEngine {
    /// `sql` is `{"collection": …, "filter": …, "sort": …, "limit": …}` (§4.2, document-store form).
    /// `limit == 1` is treated as the singleton case, returning a bare object instead of an array,
    /// matching the SQL dialects' "find-one vs find-many" result shape distinction.
    async fn execute_find(&self, sql: &str, _params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<FindResult> {
        let command = parse_command(sql)?;
        let filter = bson_document(&command["filter"])?;
        let collection = self.collection_for(ctx, collection_name(&command)?).await?;

        let limit = command.get("limit").and_then(|v| v.as_i64());
        let sort = command.get("sort").filter(|v| !v.is_null()).map(bson_document).transpose()?;
        let policy = RetryPolicy::default();

        if limit == Some(1) {
            let json = execute_with_retry(&policy, &DocDbTransientClassifier, |_n| async {
                let mut builder = FindOneOptions::builder();
                if let Some(sort) = sort.clone() {
                    builder = builder.sort(sort);
                }
                let found = collection
                    .find_one(filter.clone(), builder.build())
                    .await
                    .map_err(|e| GatewayError::database_operation_failed(format!("document-store query failed: {e}"), true))?;
                match found {
                    Some(doc) => bson_to_json(doc),
                    None => Ok(serde_json::Value::Null),
                }
            })
            .await?;
            return Ok(FindResult { json });
        }

        let json = execute_with_retry(&policy, &DocDbTransientClassifier, |_n| async {
            let mut builder = FindOptions::builder();
            if let Some(sort) = sort.clone() {
                builder = builder.sort(sort);
            }
            if let Some(limit) = limit {
                builder = builder.limit(limit);
            }
            let mut cursor = collection
                .find(filter.clone(), builder.build())
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("document-store query failed: {e}"), true))?;

            let mut docs = Vec::new();
            while let Some(doc) = cursor.try_next().await.map_err(|e| {
                GatewayError::database_operation_failed(format!("document-store cursor read failed: {e}"), true)
            })? {
                docs.push(bson_to_json(doc)?);
            }
            Ok(serde_json::Value::Array(docs))
        })
        .await?;
        Ok(FindResult { json })
    }

    /// `sql` is `{"collection": …, "document": …}` (insert), `{"collection": …, "filter": …, "set": …}`
    /// (update), or `{"collection": …, "filter": …}` (delete, no `set` key) — §4.2 document-store form.
    async fn execute_mutation(&self, sql: &str, _params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<MutationResult> {
        let command = parse_command(sql)?;
        let collection = self.collection_for(ctx, collection_name(&command)?).await?;
        let policy = RetryPolicy::default();

        if let Some(doc) = command.get("document") {
            let doc = bson_document(doc)?;
            execute_with_retry(&policy, &DocDbTransientClassifier, |_n| async {
                collection.insert_one(doc.clone(), None).await.map_err(|e| {
                    GatewayError::database_operation_failed(format!("document-store insert failed: {e}"), true)
                })
            })
            .await?;
            return Ok(MutationResult { row: Some(bson_to_json(doc)?), rows_affected: 1 });
        }

        if let Some(set) = command.get("set") {
            let filter = bson_document(&command["filter"])?;
            let update = bson::doc! { "$set": bson_document(set)? };
            let result = execute_with_retry(&policy, &DocDbTransientClassifier, |_n| async {
                collection.update_many(filter.clone(), update.clone(), None).await.map_err(|e| {
                    GatewayError::database_operation_failed(format!("document-store update failed: {e}"), true)
                })
            })
            .await?;
            return Ok(MutationResult { row: None, rows_affected: result.modified_count });
        }

        let filter = bson_document(&command["filter"])?;
        let result = execute_with_retry(&policy, &DocDbTransientClassifier, |_n| async {
            collection
                .delete_many(filter.clone(), None)
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("document-store delete failed: {e}"), true))
        })
        .await?;
        Ok(MutationResult { row: None, rows_affected: result.deleted_count })
    }

    /// `statements` always carries exactly one command — `{"collection": …, "filter": …, "set": …,
    /// "set_on_insert": …}` — run via the driver's native `update_one(..., upsert: true)`.
    /// `UpdateResult::upserted_id` tells insert from update apart directly, with no confirming select
    /// needed.
    async fn execute_upsert(&self, statements: &[&str], _params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<UpsertResult> {
        let command = parse_command(statements[0])?;
        let collection = self.collection_for(ctx, collection_name(&command)?).await?;

        let filter = bson_document(&command["filter"])?;
        let set_doc = bson_document(&command["set"])?;
        let mut update = bson::doc! { "$set": set_doc };
        if let Some(set_on_insert) = command.get("set_on_insert") {
            let set_on_insert_doc = bson_document(set_on_insert)?;
            if !set_on_insert_doc.is_empty() {
                update.insert("$setOnInsert", set_on_insert_doc);
            }
        }

        let policy = RetryPolicy::default();
        let result = execute_with_retry(&policy, &DocDbTransientClassifier, |_n| async {
            collection
                .update_one(filter.clone(), update.clone(), UpdateOptions::builder().upsert(true).build())
                .await
                .map_err(|e| GatewayError::database_operation_failed(format!("document-store upsert failed: {e}"), true))
        })
        .await?;

        let is_update = result.upserted_id.is_none();
        let row = collection
            .find_one(filter, None)
            .await
            .map_err(|e| GatewayError::database_operation_failed(format!("document-store upsert readback failed: {e}"), true))?;
        let json = row.map(bson_to_json).transpose()?;
        Ok(UpsertResult { row: json, is_update })
    }
}

/// Document-store transient-error classification (§4.4): network/connection-pool exhaustion and
/// replica-set write-concern timeouts are retried; duplicate-key and validation errors are not.
pub struct DocDbTransientClassifier;

impl querygate_core::TransientErrorClassifier for DocDbTransientClassifier {
    fn is_transient(&self, error: &GatewayError) -> bool {
        const TRANSIENT_MARKERS: &[&str] =
            &["connection pool", "server selection timeout", "not primary", "network error", "connection closed"];
        let message = error.message.to_lowercase();
        TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_core::TransientErrorClassifier;

    #[test]
    fn malformed_command_text_is_unexpected_error() {
        let err = parse_command("not json").unwrap_err();
        assert_eq!(err.sub_status(), querygate_core::SubStatus::UnexpectedError);
    }

    #[test]
    fn well_formed_filter_document_round_trips_into_bson() {
        let command = parse_command(r#"{"filter": {"id": 7}}"#).unwrap();
        let doc = bson_document(&command["filter"]).unwrap();
        assert_eq!(doc.get_i32("id").or_else(|_| doc.get_i64("id").map(|v| v as i32)).unwrap(), 7);
    }

    #[test]
    fn missing_collection_name_is_rejected() {
        let command = parse_command(r#"{"filter": {}}"#).unwrap();
        assert!(collection_name(&command).is_err());
    }

    #[test]
    fn server_selection_timeout_is_transient() {
        let err = GatewayError::database_operation_failed("Kind: Server selection timeout", true);
        assert!(DocDbTransientClassifier.is_transient(&err));
    }

    #[test]
    fn duplicate_key_is_not_transient() {
        let err = GatewayError::database_operation_failed("E11000 duplicate key error", true);
        assert!(!DocDbTransientClassifier.is_transient(&err));
    }
}
