//! PostgreSQL SQL builder: `to_jsonb`/`jsonb_agg` result shaping, `RETURNING` mutations, and the
//! `update_cte`/`insert_cte` upsert (§4.2). Grounded on the donor's `prax-query/src/sql.rs` `SqlBuilder`
//! string-assembly shape, generalized via [`querygate_core::render`].

use querygate_core::{
    and_join, render_column, render_join, render_predicate, ColumnType, Dialect, FindStructure, InsertStructure,
    OrderByColumn, PredicateOperand, UpdateStructure, UpsertStructure,
};

pub struct PgsqlDialect;

impl Dialect for PgsqlDialect {
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }
}

fn quoted_table(dialect: &PgsqlDialect, schema: Option<&str>, name: &str, alias: &str) -> String {
    let object = match schema {
        Some(schema) => format!("{}.{}", dialect.quote_identifier(schema), dialect.quote_identifier(name)),
        None => dialect.quote_identifier(name),
    };
    format!("{object} AS {}", dialect.quote_identifier(alias))
}

fn render_order_by(dialect: &PgsqlDialect, order_by: &[OrderByColumn]) -> Option<String> {
    if order_by.is_empty() {
        return None;
    }
    let rendered: Vec<String> =
        order_by.iter().map(|o| format!("{} {}", render_column(dialect, &o.column), o.direction.sql_keyword())).collect();
    Some(format!("ORDER BY {}", rendered.join(", ")))
}

/// Renders one select-list entry, applying `encode(col,'base64') AS "label"` for byte-array columns
/// (§4.2's PG-SQL column-type quirk table).
fn render_select_column(
    dialect: &PgsqlDialect,
    find: &FindStructure,
    labelled: &querygate_core::LabelledColumn,
) -> String {
    let is_bytes = find
        .header
        .source
        .column_by_backing(&labelled.column.name)
        .map(|c| c.column_type == ColumnType::Bytes)
        .unwrap_or(false);

    let rendered_col = render_column(dialect, &labelled.column);
    if is_bytes {
        format!("encode({rendered_col}, 'base64') AS {}", dialect.quote_identifier(&labelled.label))
    } else {
        format!("{rendered_col} AS {}", dialect.quote_identifier(&labelled.label))
    }
}

fn inner_select(find: &FindStructure) -> String {
    let dialect = PgsqlDialect;
    let columns = if find.columns.is_empty() {
        "*".to_string()
    } else {
        find.columns.iter().map(|lc| render_select_column(&dialect, find, lc)).collect::<Vec<_>>().join(", ")
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

/// `SELECT COALESCE(jsonb_agg(to_jsonb(subq)),'[]'::jsonb) AS data FROM (…) subq` for a find-many, so
/// that an empty result set renders `[]` instead of SQL `NULL` (§4.2, scenario 2), or `SELECT
/// to_jsonb(subq) FROM (…) AS subq LIMIT 1` for a singleton.
pub fn build_find_sql(find: &FindStructure, singleton: bool) -> String {
    let inner = inner_select(find);
    if singleton {
        format!("SELECT to_jsonb(subq) FROM ({inner}) AS subq LIMIT 1")
    } else {
        format!("SELECT COALESCE(jsonb_agg(to_jsonb(subq)),'[]'::jsonb) AS data FROM ({inner}) subq")
    }
}

/// `INSERT INTO … (…) VALUES (…) RETURNING *`.
pub fn build_insert_sql(insert: &InsertStructure) -> String {
    let dialect = PgsqlDialect;
    let table = quoted_table(&dialect, insert.header.source.schema.as_deref(), &insert.header.source.name, &insert.header.source_alias);
    let cols: Vec<String> = insert.values.iter().map(|(c, _)| dialect.quote_identifier(c)).collect();
    let vals: Vec<String> = insert.values.iter().map(|(_, v)| render_value(&dialect, v)).collect();
    format!("INSERT INTO {table} ({}) VALUES ({}) RETURNING *", cols.join(", "), vals.join(", "))
}

/// `UPDATE … SET … WHERE <policy AND predicates> RETURNING *`.
pub fn build_update_sql(update: &UpdateStructure) -> String {
    let dialect = PgsqlDialect;
    let table = quoted_table(&dialect, update.header.source.schema.as_deref(), &update.header.source.name, &update.header.source_alias);
    let sets: Vec<String> =
        update.values.iter().map(|(c, v)| format!("{} = {}", dialect.quote_identifier(c), render_value(&dialect, v))).collect();

    let mut predicates = update.predicates.clone();
    if let Some(policy) = update.header.get_db_policy(querygate_core::ElementalOperation::Update) {
        predicates.push(policy);
    }
    let where_clause = render_predicate(&dialect, &and_join(predicates));

    format!("UPDATE {table} SET {} WHERE {where_clause} RETURNING *", sets.join(", "))
}

/// `DELETE FROM … WHERE <policy AND predicates> RETURNING *`.
pub fn build_delete_sql(delete: &querygate_core::DeleteStructure) -> String {
    let dialect = PgsqlDialect;
    let table = quoted_table(&dialect, delete.header.source.schema.as_deref(), &delete.header.source.name, &delete.header.source_alias);

    let mut predicates = delete.predicates.clone();
    if let Some(policy) = delete.header.get_db_policy(querygate_core::ElementalOperation::Delete) {
        predicates.push(policy);
    }
    let where_clause = render_predicate(&dialect, &and_join(predicates));
    format!("DELETE FROM {table} WHERE {where_clause} RETURNING *")
}

/// The `WITH update_cte … insert_cte …` upsert (§4.2): the update runs first; the insert only fires when
/// `update_cte` produced no row, guarded by `NOT EXISTS`. Each branch tags its row with a literal
/// `is_update` column so the executor classifies the result straight from the single statement, unlike
/// T-SQL's two-statement batch.
pub fn build_upsert_sql(upsert: &UpsertStructure) -> String {
    let dialect = PgsqlDialect;
    let table = quoted_table(&dialect, upsert.header.source.schema.as_deref(), &upsert.header.source.name, &upsert.header.source_alias);

    let mut predicates = upsert.predicates.clone();
    if let Some(policy) = upsert.header.get_db_policy(querygate_core::ElementalOperation::Update) {
        predicates.push(policy);
    }
    let where_clause = render_predicate(&dialect, &and_join(predicates));

    let sets: Vec<String> =
        upsert.update_values.iter().map(|(c, v)| format!("{} = {}", dialect.quote_identifier(c), render_value(&dialect, v))).collect();
    let insert_cols: Vec<String> = upsert.insert_values.iter().map(|(c, _)| dialect.quote_identifier(c)).collect();
    let insert_vals: Vec<String> = upsert.insert_values.iter().map(|(_, v)| render_value(&dialect, v)).collect();

    format!(
        "WITH update_cte AS (\n\
         \tUPDATE {table} SET {} WHERE {where_clause} RETURNING *, TRUE AS is_update\n\
         ),\n\
         insert_cte AS (\n\
         \tINSERT INTO {table} ({}) SELECT {}\n\
         \tWHERE NOT EXISTS (SELECT 1 FROM update_cte)\n\
         \tRETURNING *, FALSE AS is_update\n\
         )\n\
         SELECT * FROM update_cte\n\
         UNION ALL\n\
         SELECT * FROM insert_cte",
        sets.join(", "),
        insert_cols.join(", "),
        insert_vals.join(", ")
    )
}

fn render_value(dialect: &PgsqlDialect, operand: &PredicateOperand) -> String {
    match operand {
        PredicateOperand::Literal(text) => text.to_string(),
        PredicateOperand::Column(c) => render_column(dialect, c),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygate_core::{
        ColumnDef, FilterValue, ParameterSink, Predicate, PredicateOp, SourceDefinition, StaticMetadataProvider,
    };

    fn book_metadata() -> StaticMetadataProvider {
        StaticMetadataProvider::new().register(
            "Book",
            SourceDefinition::new(
                "books",
                vec![ColumnDef::new("id", ColumnType::Int).not_null().auto_generated(), ColumnDef::new("title", ColumnType::Text)],
                vec!["id".into()],
            )
            .with_schema("dbo"),
        )
    }

    #[test]
    fn scenario_2_find_many_wraps_in_coalesced_jsonb_agg() {
        let md = book_metadata();
        let mut find = FindStructure::new("Book", &md).unwrap();
        let col = find.header.base_column("id");
        let lt_param = find.add_parameter(FilterValue::Int(4), Some("id"));
        let gt_param = find.add_parameter(FilterValue::Int(1), Some("id"));
        let title_col = find.header.base_column("title");
        let title_param = find.add_parameter(FilterValue::from("Awesome book"), Some("title"));

        find.add_predicate(Predicate::binary(PredicateOperand::column(col.clone()), PredicateOp::LessThan, PredicateOperand::param(lt_param)));
        find.add_predicate(Predicate::binary(PredicateOperand::column(col), PredicateOp::GreaterThan, PredicateOperand::param(gt_param)));
        find.add_predicate(Predicate::binary(PredicateOperand::column(title_col), PredicateOp::NotEqual, PredicateOperand::param(title_param)));

        let sql = build_find_sql(&find, false);
        assert!(sql.starts_with("SELECT COALESCE(jsonb_agg(to_jsonb(subq)),'[]'::jsonb) AS data FROM (SELECT * FROM \"dbo\".\"books\""));
        assert!(sql.contains("WHERE \"table0\".\"id\" < @param0 AND \"table0\".\"id\" > @param1 AND \"table0\".\"title\" != @param2"));
        assert!(sql.ends_with(") subq"));
    }

    #[test]
    fn singleton_find_limits_to_one_row() {
        let md = book_metadata();
        let find = FindStructure::new("Book", &md).unwrap();
        let sql = build_find_sql(&find, true);
        assert!(sql.starts_with("SELECT to_jsonb(subq) FROM ("));
        assert!(sql.ends_with(") AS subq LIMIT 1"));
    }

    #[test]
    fn insert_returns_all_columns() {
        let md = book_metadata();
        let mut insert = InsertStructure::new("Book", &md).unwrap();
        insert.set_value("title", FilterValue::from("Leviathan Wakes"));
        let sql = build_insert_sql(&insert);
        assert!(sql.ends_with("RETURNING *"));
    }

    #[test]
    fn upsert_sql_has_both_ctes_and_union() {
        let md = book_metadata();
        let mut upsert = querygate_core::UpsertStructure::new("Book", &md).unwrap();
        upsert.set_value("title", FilterValue::from("Caliban's War"));
        let col = upsert.header.base_column("id");
        let param = upsert.header.add_parameter(FilterValue::Int(7), Some("id"));
        upsert.add_predicate(Predicate::binary(PredicateOperand::column(col), PredicateOp::Equal, PredicateOperand::param(param)));

        let sql = build_upsert_sql(&upsert);
        assert!(sql.contains("update_cte"));
        assert!(sql.contains("insert_cte"));
        assert!(sql.contains("NOT EXISTS (SELECT 1 FROM update_cte)"));
        assert!(sql.contains("UNION ALL"));
    }
}
