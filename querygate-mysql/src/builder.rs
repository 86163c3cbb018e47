//! MySQL SQL builder: `JSON_ARRAYAGG(JSON_OBJECT(...))` result shaping, `ROW_COUNT()`-guarded selects
//! for mutations (MySQL has no `RETURNING`), and the `ON DUPLICATE KEY UPDATE` upsert with a captured
//! local to tell insert from update apart (§4.2). Grounded on the donor's `prax-mysql/src/engine.rs`
//! `build_select`/`build_insert`/`build_update`/`build_delete` string-assembly shape, generalized via
//! [`querygate_core::render`].

use querygate_core::{
    and_join, render_column, render_join, render_predicate, Column, ColumnType, Dialect, FindStructure,
    InsertStructure, OrderByColumn, PredicateOperand, UpdateStructure, UpsertStructure,
};

pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }
}

fn quoted_table(dialect: &MysqlDialect, schema: Option<&str>, name: &str, alias: &str) -> String {
    let object = match schema {
        Some(schema) => format!("{}.{}", dialect.quote_identifier(schema), dialect.quote_identifier(name)),
        None => dialect.quote_identifier(name),
    };
    format!("{object} AS {}", dialect.quote_identifier(alias))
}

fn render_order_by(dialect: &MysqlDialect, order_by: &[OrderByColumn]) -> Option<String> {
    if order_by.is_empty() {
        return None;
    }
    let rendered: Vec<String> =
        order_by.iter().map(|o| format!("{} {}", render_column(dialect, &o.column), o.direction.sql_keyword())).collect();
    Some(format!("ORDER BY {}", rendered.join(", ")))
}

fn inner_select(find: &FindStructure) -> String {
    let dialect = MysqlDialect;
    let columns = if find.columns.is_empty() {
        "*".to_string()
    } else {
        find.columns
            .iter()
            .map(|lc| format!("{} AS {}", render_column(&dialect, &lc.column), dialect.quote_identifier(&lc.label)))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let from = quoted_table(&dialect, find.header.source.schema.as_deref(), &find.header.source.name, &find.header.source_alias);

    let mut predicates = find.predicates.clone();
    if let Some(policy) = find.header.get_db_policy(querygate_core::ElementalOperation::Read) {
        predicates.push(policy);
    }
    let where_clause = render_predicate(&dialect, &and_join(predicates));

    let mut sql = format!("SELECT {columns} FROM {from} WHERE {where_clause}");

    for join in &find.joins {
        let on_predicate = and_join(join.predicates.clone());
        sql.push(' ');
        sql.push_str(&render_join(&dialect, join, &on_predicate));
    }

    if let Some(order_sql) = render_order_by(&dialect, &find.order_by) {
        sql.push(' ');
        sql.push_str(&order_sql);
    }
    if let Some(pagination) = &find.pagination {
        if let Some(first) = pagination.first {
            sql.push_str(&format!(" LIMIT {first}"));
        }
    }
    sql
}

/// The labels and source columns a `JSON_OBJECT(...)` call needs, resolved either from the structure's
/// explicit select list or (when none was requested) from every column on the entity.
fn json_object_pairs(find: &FindStructure) -> Vec<(String, Column, ColumnType)> {
    let backing = |col: &Column| find.header.source.column_by_backing(&col.name).map(|c| c.column_type).unwrap_or(ColumnType::Text);

    if find.columns.is_empty() {
        find.header
            .source
            .columns
            .iter()
            .map(|c| {
                let mut col = find.header.base_column(&c.backing_name);
                col.table_alias = Some("subq".into());
                (c.exposed_name.to_string(), col, c.column_type)
            })
            .collect()
    } else {
        find.columns
            .iter()
            .map(|lc| {
                // The inner select aliases this column to `lc.label`, so the outer JSON_OBJECT must
                // address it by that alias, not by its original backing name.
                let mut col = Column::new("subq", lc.label.to_string());
                col.table_alias = Some("subq".into());
                let ty = backing(&lc.column);
                (lc.label.to_string(), col, ty)
            })
            .collect()
    }
}

fn render_json_object(dialect: &MysqlDialect, find: &FindStructure) -> String {
    let pairs: Vec<String> = json_object_pairs(find)
        .into_iter()
        .map(|(label, col, column_type)| {
            let rendered_col = render_column(dialect, &col);
            let value_expr = match column_type {
                ColumnType::Bool => format!("CAST({rendered_col} IS TRUE AS JSON)"),
                ColumnType::Bytes => format!("TO_BASE64({rendered_col})"),
                _ => rendered_col,
            };
            format!("'{label}', {value_expr}")
        })
        .collect();
    format!("JSON_OBJECT({})", pairs.join(", "))
}

/// `SELECT COALESCE(JSON_ARRAYAGG(JSON_OBJECT(...)), JSON_ARRAY()) FROM (…) AS subq`, so that an empty
/// result set renders `[]` instead of SQL `NULL` (§4.2), or `SELECT JSON_OBJECT(...) FROM (…) AS subq
/// LIMIT 1` for a singleton.
pub fn build_find_sql(find: &FindStructure, singleton: bool) -> String {
    let dialect = MysqlDialect;
    let inner = inner_select(find);
    let json_object = render_json_object(&dialect, find);
    if singleton {
        format!("SELECT {json_object} FROM ({inner}) AS subq LIMIT 1")
    } else {
        format!("SELECT COALESCE(JSON_ARRAYAGG({json_object}), JSON_ARRAY()) FROM ({inner}) AS subq")
    }
}

/// MySQL has no `RETURNING`: the insert and its confirming, `ROW_COUNT()`-guarded select run as two
/// statements (§4.2).
pub fn build_insert_batch(insert: &InsertStructure) -> (String, String) {
    let dialect = MysqlDialect;
    let table = quoted_table(&dialect, insert.header.source.schema.as_deref(), &insert.header.source.name, &insert.header.source_alias);
    let cols: Vec<String> = insert.values.iter().map(|(c, _)| dialect.quote_identifier(c)).collect();
    let vals: Vec<String> = insert.values.iter().map(|(_, v)| render_value(&dialect, v)).collect();

    let insert_statement = format!("INSERT INTO {table} ({}) VALUES ({});", cols.join(", "), vals.join(", "));
    let pk_column = insert
        .header
        .source
        .primary_key
        .first()
        .map(|pk| dialect.quote_identifier(pk))
        .unwrap_or_else(|| dialect.quote_identifier("id"));
    let confirm_statement = format!("SELECT * FROM {table} WHERE {pk_column} = LAST_INSERT_ID() AND ROW_COUNT() > 0;");
    (insert_statement, confirm_statement)
}

/// `UPDATE … SET … WHERE <predicate>;` followed by a `ROW_COUNT()`-guarded confirming select.
pub fn build_update_batch(update: &UpdateStructure) -> (String, String) {
    let dialect = MysqlDialect;
    let table = quoted_table(&dialect, update.header.source.schema.as_deref(), &update.header.source.name, &update.header.source_alias);
    let sets: Vec<String> =
        update.values.iter().map(|(c, v)| format!("{} = {}", dialect.quote_identifier(c), render_value(&dialect, v))).collect();

    let mut predicates = update.predicates.clone();
    if let Some(policy) = update.header.get_db_policy(querygate_core::ElementalOperation::Update) {
        predicates.push(policy);
    }
    let where_clause = render_predicate(&dialect, &and_join(predicates));

    let update_statement = format!("UPDATE {table} SET {} WHERE {where_clause};", sets.join(", "));
    let confirm_statement = format!("SELECT * FROM {table} WHERE {where_clause} AND ROW_COUNT() > 0;");
    (update_statement, confirm_statement)
}

/// `DELETE FROM … WHERE <predicate>` — no confirming select; the executor reads the affected-row count
/// directly off the connection.
pub fn build_delete_sql(delete: &querygate_core::DeleteStructure) -> String {
    let dialect = MysqlDialect;
    let table = quoted_table(&dialect, delete.header.source.schema.as_deref(), &delete.header.source.name, &delete.header.source_alias);

    let mut predicates = delete.predicates.clone();
    if let Some(policy) = delete.header.get_db_policy(querygate_core::ElementalOperation::Delete) {
        predicates.push(policy);
    }
    let where_clause = render_predicate(&dialect, &and_join(predicates));
    format!("DELETE FROM {table} WHERE {where_clause}")
}

/// `INSERT … ON DUPLICATE KEY UPDATE …` (§4.2, §4.7): MySQL's own affected-rows convention reports `1`
/// for a fresh insert and `2` for a row that got updated, so a captured local (`@qg_is_update`) records
/// that distinction before the confirming select runs — the multi-statement batch this builds requires
/// `CLIENT_MULTI_STATEMENTS` on the connection (see the pool's connection options).
pub fn build_upsert_batch(upsert: &UpsertStructure) -> Vec<String> {
    let dialect = MysqlDialect;
    let table = quoted_table(&dialect, upsert.header.source.schema.as_deref(), &upsert.header.source.name, &upsert.header.source_alias);

    let insert_cols: Vec<String> = upsert.insert_values.iter().map(|(c, _)| dialect.quote_identifier(c)).collect();
    let insert_vals: Vec<String> = upsert.insert_values.iter().map(|(_, v)| render_value(&dialect, v)).collect();
    let updates: Vec<String> = upsert
        .update_values
        .iter()
        .map(|(c, _)| {
            let quoted = dialect.quote_identifier(c);
            format!("{quoted} = VALUES({quoted})")
        })
        .collect();

    let pk_column = upsert
        .header
        .source
        .primary_key
        .first()
        .map(|pk| dialect.quote_identifier(pk))
        .unwrap_or_else(|| dialect.quote_identifier("id"));

    let upsert_statement = format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {};",
        insert_cols.join(", "),
        insert_vals.join(", "),
        updates.join(", ")
    );
    let capture_statement = "SET @qg_is_update := (ROW_COUNT() = 2);".to_string();
    let confirm_statement =
        format!("SELECT *, @qg_is_update AS is_update FROM {table} WHERE {pk_column} = LAST_INSERT_ID();");

    vec![upsert_statement, capture_statement, confirm_statement]
}

fn render_value(dialect: &MysqlDialect, operand: &PredicateOperand) -> String {
    match operand {
        PredicateOperand::Literal(text) => text.to_string(),
        PredicateOperand::Column(c) => render_column(dialect, c),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_core::{ColumnDef, FilterValue, ParameterSink, Predicate, PredicateOp, SourceDefinition, StaticMetadataProvider};

    fn book_metadata() -> StaticMetadataProvider {
        StaticMetadataProvider::new().register(
            "Book",
            SourceDefinition::new(
                "books",
                vec![
                    ColumnDef::new("id", ColumnType::Int).not_null().auto_generated(),
                    ColumnDef::new("title", ColumnType::Text),
                    ColumnDef::new("is_available", ColumnType::Bool),
                ],
                vec!["id".into()],
            ),
        )
    }

    #[test]
    fn find_many_wraps_json_object_in_coalesced_arrayagg() {
        let md = book_metadata();
        let find = FindStructure::new("Book", &md).unwrap();
        let sql = build_find_sql(&find, false);
        assert!(sql.starts_with("SELECT COALESCE(JSON_ARRAYAGG(JSON_OBJECT("));
        assert!(sql.contains("CAST(`subq`.`is_available` IS TRUE AS JSON)"));
        assert!(sql.contains("), JSON_ARRAY()) FROM ("));
        assert!(sql.ends_with(") AS subq"));
    }

    #[test]
    fn singleton_find_has_no_arrayagg_and_limits_one() {
        let md = book_metadata();
        let find = FindStructure::new("Book", &md).unwrap();
        let sql = build_find_sql(&find, true);
        assert!(sql.starts_with("SELECT JSON_OBJECT("));
        assert!(!sql.contains("JSON_ARRAYAGG"));
        assert!(sql.ends_with(") AS subq LIMIT 1"));
    }

    #[test]
    fn insert_batch_confirms_via_last_insert_id_and_row_count() {
        let md = book_metadata();
        let mut insert = InsertStructure::new("Book", &md).unwrap();
        insert.set_value("title", FilterValue::from("Leviathan Wakes"));
        let (insert_sql, confirm_sql) = build_insert_batch(&insert);
        assert!(insert_sql.starts_with("INSERT INTO `books`"));
        assert!(confirm_sql.contains("LAST_INSERT_ID()"));
        assert!(confirm_sql.contains("ROW_COUNT() > 0"));
    }

    #[test]
    fn upsert_batch_captures_row_count_before_confirming() {
        let md = book_metadata();
        let mut upsert = querygate_core::UpsertStructure::new("Book", &md).unwrap();
        upsert.set_value("title", FilterValue::from("Caliban's War"));
        let col = upsert.header.base_column("id");
        let param = upsert.header.add_parameter(FilterValue::Int(7), Some("id"));
        upsert.add_predicate(Predicate::binary(PredicateOperand::column(col), PredicateOp::Equal, PredicateOperand::param(param)));

        let statements = build_upsert_batch(&upsert);
        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains("ON DUPLICATE KEY UPDATE"));
        assert_eq!(statements[1], "SET @qg_is_update := (ROW_COUNT() = 2);");
        assert!(statements[2].contains("@qg_is_update AS is_update"));
    }
}
