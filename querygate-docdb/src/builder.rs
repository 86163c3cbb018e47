//! Document-store query builder: lowers the shared predicate tree into MongoDB filter/update/sort
//! documents instead of SQL text (§4.2's "dialect-agnostic intermediate representation" applied to a
//! non-relational backend). Grounded on the donor's `prax-mongodb/src/filter.rs` `FilterBuilder` fluent
//! API (operator vocabulary: `$eq`/`$ne`/`$gt`/`$gte`/`$lt`/`$lte`/`$regex`/`$and`/`$or`) and
//! `prax-mongodb/src/engine.rs`'s own convention of carrying a document as JSON text through the
//! `QueryEngine` trait's `sql: &str` parameter.
//!
//! Unlike the three SQL dialects, parameter values are substituted directly into the filter at build
//! time rather than deferred to the executor: MongoDB has no server-side prepared-statement binding the
//! way the SQL wire protocols do, so there is no placeholder syntax to translate. The emitted JSON text
//! therefore does not retain `@paramN` tokens the way SQL text does — §8's parameter-closure property is
//! stated for the SQL builders specifically and doesn't apply to a document query with no SQL text.

use indexmap::IndexMap;
use smol_str::SmolStr;

use querygate_core::{
    DeleteStructure, FilterValue, FindStructure, InsertStructure, Parameter, Predicate, PredicateOp, PredicateOperand,
    UpdateStructure, UpsertStructure,
};

fn filter_value_to_json(value: &FilterValue) -> serde_json::Value {
    match value {
        FilterValue::Null => serde_json::Value::Null,
        FilterValue::Bool(b) => serde_json::Value::Bool(*b),
        FilterValue::Int(n) => serde_json::Value::from(*n),
        FilterValue::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        FilterValue::String(s) => serde_json::Value::String(s.clone()),
        FilterValue::Json(v) => v.clone(),
    }
}

/// Resolves a `PredicateOperand::Literal` token: `@paramN` tokens look the bound value up in
/// `parameters`; anything else (only ever the `1`/`1` tautology literal today) is parsed as a bare JSON
/// scalar.
fn resolve_literal(text: &str, parameters: &IndexMap<SmolStr, Parameter>) -> serde_json::Value {
    if let Some(param) = parameters.get(text) {
        return filter_value_to_json(&param.value);
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Translates a SQL `LIKE` pattern (`%`/`_` wildcards) into an anchored Mongo `$regex` source.
fn like_pattern_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            c if r"\.+*?()|[]{}^$".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    regex
}

fn is_tautology(predicate: &Predicate) -> bool {
    matches!(
        (&predicate.left, predicate.op, &predicate.right),
        (PredicateOperand::Literal(l), PredicateOp::Equal, PredicateOperand::Literal(r)) if l == "1" && r == "1"
    )
}

/// Recursively lowers a predicate tree into a Mongo filter document. Column comparisons assume the
/// left operand is the column and the right is the bound value, the convention every visitor/policy
/// caller in this gateway uses; `Exists` (relational subquery correlation) has no document-store
/// counterpart and is left as an always-true filter, since document stores model to-many relationships
/// by embedding or by a separate query rather than a correlated subquery.
fn render_predicate_to_filter(predicate: &Predicate, parameters: &IndexMap<SmolStr, Parameter>) -> serde_json::Value {
    if is_tautology(predicate) {
        return serde_json::json!({});
    }

    match predicate.op {
        PredicateOp::And | PredicateOp::Or => {
            let key = if predicate.op == PredicateOp::And { "$and" } else { "$or" };
            let left = operand_to_filter(&predicate.left, parameters);
            let right = operand_to_filter(&predicate.right, parameters);
            let mut obj = serde_json::Map::new();
            obj.insert(key.to_string(), serde_json::Value::Array(vec![left, right]));
            serde_json::Value::Object(obj)
        }
        PredicateOp::Exists => serde_json::json!({}),
        _ => {
            let field = match &predicate.left {
                PredicateOperand::Column(c) => c.name.to_string(),
                other => panic!("document-store predicates require a column on the left, got {other:?}"),
            };
            let value = match &predicate.right {
                PredicateOperand::Literal(text) => resolve_literal(text, parameters),
                other => panic!("document-store predicates require a literal/parameter on the right, got {other:?}"),
            };

            let condition = match predicate.op {
                PredicateOp::Equal | PredicateOp::Is => value,
                PredicateOp::NotEqual | PredicateOp::IsNot => serde_json::json!({ "$ne": value }),
                PredicateOp::GreaterThan => serde_json::json!({ "$gt": value }),
                PredicateOp::GreaterOrEqual => serde_json::json!({ "$gte": value }),
                PredicateOp::LessThan => serde_json::json!({ "$lt": value }),
                PredicateOp::LessOrEqual => serde_json::json!({ "$lte": value }),
                PredicateOp::Like => {
                    let pattern = value.as_str().map(like_pattern_to_regex).unwrap_or_default();
                    serde_json::json!({ "$regex": pattern })
                }
                PredicateOp::NotLike => {
                    let pattern = value.as_str().map(like_pattern_to_regex).unwrap_or_default();
                    serde_json::json!({ "$not": { "$regex": pattern } })
                }
                PredicateOp::And | PredicateOp::Or | PredicateOp::Exists => unreachable!("handled above"),
            };
            let mut obj = serde_json::Map::new();
            obj.insert(field, condition);
            serde_json::Value::Object(obj)
        }
    }
}

fn operand_to_filter(operand: &PredicateOperand, parameters: &IndexMap<SmolStr, Parameter>) -> serde_json::Value {
    match operand {
        PredicateOperand::Predicate(p) => render_predicate_to_filter(p, parameters),
        other => panic!("expected a nested predicate under AND/OR, got {other:?}"),
    }
}

fn find_filter(find: &FindStructure) -> serde_json::Value {
    let mut predicates = find.predicates.clone();
    if let Some(policy) = find.header.get_db_policy(querygate_core::ElementalOperation::Read) {
        predicates.push(policy);
    }
    render_predicate_to_filter(&querygate_core::and_join(predicates), find.header.parameters())
}

/// Builds `{"filter": …, "sort": …, "limit": …}` — everything [`crate::executor::DocDbEngine`] needs to
/// run a `find`/`find_one`, carried as one JSON string the way the donor's `MongoEngine::build_filter`
/// expected its `sql` argument to arrive.
pub fn build_find_command(find: &FindStructure, singleton: bool) -> serde_json::Value {
    let filter = find_filter(find);
    let sort: serde_json::Map<String, serde_json::Value> = find
        .order_by
        .iter()
        .map(|o| (o.column.name.to_string(), serde_json::Value::from(if o.direction == querygate_core::SortDirection::Asc { 1 } else { -1 })))
        .collect();

    let mut command = serde_json::json!({ "collection": find.header.source.name.to_string(), "filter": filter });
    if !sort.is_empty() {
        command["sort"] = serde_json::Value::Object(sort);
    }
    if singleton {
        command["limit"] = serde_json::Value::from(1);
    } else if let Some(pagination) = &find.pagination {
        if let Some(first) = pagination.first {
            command["limit"] = serde_json::Value::from(first);
        }
    }
    command
}

/// `{"collection": …, "document": …}` for `insert_one` (§4.2 mutations, document-store form).
pub fn build_insert_document(insert: &InsertStructure) -> serde_json::Value {
    let parameters = insert.header.parameters();
    let mut doc = serde_json::Map::new();
    for (column, operand) in &insert.values {
        let value = match operand {
            PredicateOperand::Literal(text) => resolve_literal(text, parameters),
            other => panic!("insert values must be literals/parameters, got {other:?}"),
        };
        doc.insert(column.to_string(), value);
    }
    serde_json::json!({ "collection": insert.header.source.name.to_string(), "document": doc })
}

/// `{"collection": …, "filter": …, "set": …}` for `update_many` (§4.2 mutations, document-store form).
pub fn build_update_command(update: &UpdateStructure) -> serde_json::Value {
    let parameters = update.header.parameters();
    let mut predicates = update.predicates.clone();
    if let Some(policy) = update.header.get_db_policy(querygate_core::ElementalOperation::Update) {
        predicates.push(policy);
    }
    let filter = render_predicate_to_filter(&querygate_core::and_join(predicates), parameters);

    let mut set_doc = serde_json::Map::new();
    for (column, operand) in &update.values {
        let value = match operand {
            PredicateOperand::Literal(text) => resolve_literal(text, parameters),
            other => panic!("update values must be literals/parameters, got {other:?}"),
        };
        set_doc.insert(column.to_string(), value);
    }
    serde_json::json!({ "collection": update.header.source.name.to_string(), "filter": filter, "set": set_doc })
}

/// `{"collection": …, "filter": …}` for `delete_many` (§4.2 mutations, document-store form).
pub fn build_delete_filter(delete: &DeleteStructure) -> serde_json::Value {
    let parameters = delete.header.parameters();
    let mut predicates = delete.predicates.clone();
    if let Some(policy) = delete.header.get_db_policy(querygate_core::ElementalOperation::Delete) {
        predicates.push(policy);
    }
    let filter = render_predicate_to_filter(&querygate_core::and_join(predicates), parameters);
    serde_json::json!({ "collection": delete.header.source.name.to_string(), "filter": filter })
}

/// `{"collection": …, "filter": …, "set": …, "set_on_insert": …}` for a native
/// `update_one(..., upsert: true)` (§4.7, document-store form): unlike the SQL dialects, MongoDB has
/// first-class upsert support, so there is no count-then-branch state machine to build — the driver's
/// `UpdateResult::upserted_id` already tells the executor whether a fresh document was created.
pub fn build_upsert_command(upsert: &UpsertStructure) -> serde_json::Value {
    let parameters = upsert.header.parameters();
    let filter = render_predicate_to_filter(&querygate_core::and_join(upsert.predicates.clone()), parameters);

    let mut set_doc = serde_json::Map::new();
    for (column, operand) in &upsert.update_values {
        let value = match operand {
            PredicateOperand::Literal(text) => resolve_literal(text, parameters),
            other => panic!("upsert values must be literals/parameters, got {other:?}"),
        };
        set_doc.insert(column.to_string(), value);
    }

    let update_columns: std::collections::HashSet<&str> = upsert.update_values.iter().map(|(c, _)| c.as_str()).collect();
    let mut set_on_insert_doc = serde_json::Map::new();
    for (column, operand) in &upsert.insert_values {
        if update_columns.contains(column.as_str()) {
            continue;
        }
        let value = match operand {
            PredicateOperand::Literal(text) => resolve_literal(text, parameters),
            other => panic!("upsert values must be literals/parameters, got {other:?}"),
        };
        set_on_insert_doc.insert(column.to_string(), value);
    }

    serde_json::json!({
        "collection": upsert.header.source.name.to_string(),
        "filter": filter,
        "set": set_doc,
        "set_on_insert": set_on_insert_doc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_core::{
        ColumnDef, ColumnType, FilterValue as Fv, ParameterSink, PredicateOperand as Po, SourceDefinition,
        StaticMetadataProvider,
    };

    fn book_metadata() -> StaticMetadataProvider {
        StaticMetadataProvider::new().register(
            "Book",
            SourceDefinition::new(
                "books",
                vec![ColumnDef::new("id", ColumnType::Int).not_null().auto_generated(), ColumnDef::new("title", ColumnType::Text)],
                vec!["id".into()],
            ),
        )
    }

    #[test]
    fn equality_predicate_lowers_to_direct_field_match() {
        let md = book_metadata();
        let mut find = FindStructure::new("Book", &md).unwrap();
        let col = find.header.base_column("id");
        let param = find.add_parameter(Fv::Int(7), Some("id"));
        find.add_predicate(Predicate::binary(Po::column(col), PredicateOp::Equal, Po::param(param)));

        let command = build_find_command(&find, true);
        assert_eq!(command["filter"], serde_json::json!({ "id": 7 }));
        assert_eq!(command["limit"], serde_json::json!(1));
    }

    #[test]
    fn range_predicates_lower_to_and_of_operators() {
        let md = book_metadata();
        let mut find = FindStructure::new("Book", &md).unwrap();
        let col = find.header.base_column("id");
        let lt_param = find.add_parameter(Fv::Int(10), Some("id"));
        let gt_param = find.add_parameter(Fv::Int(1), Some("id"));
        find.add_predicate(Predicate::binary(Po::column(col.clone()), PredicateOp::LessThan, Po::param(lt_param)));
        find.add_predicate(Predicate::binary(Po::column(col), PredicateOp::GreaterThan, Po::param(gt_param)));

        let command = build_find_command(&find, false);
        assert_eq!(command["filter"]["$and"][0], serde_json::json!({ "id": { "$lt": 10 } }));
        assert_eq!(command["filter"]["$and"][1], serde_json::json!({ "id": { "$gt": 1 } }));
    }

    #[test]
    fn no_predicates_yields_an_empty_match_all_filter() {
        let md = book_metadata();
        let find = FindStructure::new("Book", &md).unwrap();
        let command = build_find_command(&find, false);
        assert_eq!(command["filter"], serde_json::json!({}));
    }

    #[test]
    fn insert_document_carries_every_bound_value() {
        let md = book_metadata();
        let mut insert = InsertStructure::new("Book", &md).unwrap();
        insert.set_value("title", Fv::from("Leviathan Wakes"));
        let command = build_insert_document(&insert);
        assert_eq!(command["collection"], serde_json::json!("books"));
        assert_eq!(command["document"]["title"], serde_json::json!("Leviathan Wakes"));
    }

    #[test]
    fn upsert_command_splits_update_only_from_insert_only_fields() {
        let md = book_metadata();
        let mut upsert = UpsertStructure::new("Book", &md).unwrap();
        upsert.set_value("title", Fv::from("Caliban's War"));
        let col = upsert.header.base_column("id");
        let param = upsert.header.add_parameter(Fv::Int(7), Some("id"));
        upsert.add_predicate(Predicate::binary(Po::column(col), PredicateOp::Equal, Po::param(param)));

        let command = build_upsert_command(&upsert);
        assert_eq!(command["set"]["title"], serde_json::json!("Caliban's War"));
    }
}
