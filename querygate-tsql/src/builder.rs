//! T-SQL SQL builder: `FOR JSON PATH` result shaping, `OUTPUT INSERTED.*` mutations, and the
//! two-statement upsert batch (§4.2). Grounded on the donor's `prax-query/src/sql.rs` `SqlBuilder`
//! (string-assembly shape) generalized via [`querygate_core::render`], with the T-SQL-only
//! session-context/RLS awareness from `prax-mssql/src/rls.rs`'s `sp_set_session_context` usage.

use querygate_core::{
    and_join, render_column, render_join, render_predicate, Column, Dialect, FindStructure, InsertStructure,
    OrderByColumn, PredicateOperand, UpdateStructure, UpsertStructure,
};

/// T-SQL quoting: SQL Server accepts delimited identifiers in either `[brackets]` or ANSI double quotes
/// under `QUOTED_IDENTIFIER ON` (the server default); this builder uses the ANSI form so generated text
/// matches what the rest of the gateway's tooling (and its own snapshot tests) expect across dialects.
pub struct TsqlDialect;

impl Dialect for TsqlDialect {
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }
}

fn quoted_table(dialect: &TsqlDialect, schema: Option<&str>, name: &str, alias: &str) -> String {
    let object = match schema {
        Some(schema) => format!("{}.{}", dialect.quote_identifier(schema), dialect.quote_identifier(name)),
        None => dialect.quote_identifier(name),
    };
    format!("{object} AS {}", dialect.quote_identifier(alias))
}

fn render_order_by(dialect: &TsqlDialect, order_by: &[OrderByColumn]) -> Option<String> {
    if order_by.is_empty() {
        return None;
    }
    let rendered: Vec<String> =
        order_by.iter().map(|o| format!("{} {}", render_column(dialect, &o.column), o.direction.sql_keyword())).collect();
    Some(format!("ORDER BY {}", rendered.join(", ")))
}

/// Builds the `SELECT … FOR JSON PATH` statement for a Find (§4.2 result-shape table, scenario 1).
/// `singleton` appends `WITHOUT_ARRAY_WRAPPER` for single-row routes (PK lookups).
pub fn build_find_sql(find: &FindStructure, singleton: bool) -> String {
    let dialect = TsqlDialect;
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
        if let Some(pagination) = &find.pagination {
            if let Some(first) = pagination.first {
                sql.push_str(&format!(" OFFSET 0 ROWS FETCH NEXT {first} ROWS ONLY"));
            }
        }
    }

    sql.push_str(" FOR JSON PATH, INCLUDE_NULL_VALUES");
    if singleton {
        sql.push_str(", WITHOUT_ARRAY_WRAPPER");
    }
    sql
}

/// `INSERT INTO … OUTPUT INSERTED.* VALUES (…)` (§4.2 mutations).
pub fn build_insert_sql(insert: &InsertStructure) -> String {
    let dialect = TsqlDialect;
    let table = quoted_table(&dialect, insert.header.source.schema.as_deref(), &insert.header.source.name, &insert.header.source_alias);
    let cols: Vec<String> = insert.values.iter().map(|(c, _)| dialect.quote_identifier(c)).collect();
    let vals: Vec<String> = insert.values.iter().map(|(_, v)| render_value(&dialect, v)).collect();
    format!("INSERT INTO {table} ({}) OUTPUT INSERTED.* VALUES ({})", cols.join(", "), vals.join(", "))
}

/// `UPDATE … SET … OUTPUT INSERTED.* WHERE <policy AND predicates>`.
pub fn build_update_sql(update: &UpdateStructure) -> String {
    let dialect = TsqlDialect;
    let table = quoted_table(&dialect, update.header.source.schema.as_deref(), &update.header.source.name, &update.header.source_alias);
    let sets: Vec<String> =
        update.values.iter().map(|(c, v)| format!("{} = {}", dialect.quote_identifier(c), render_value(&dialect, v))).collect();

    let mut predicates = update.predicates.clone();
    if let Some(policy) = update.header.get_db_policy(querygate_core::ElementalOperation::Update) {
        predicates.push(policy);
    }
    let where_clause = render_predicate(&dialect, &and_join(predicates));

    format!("UPDATE {table} SET {} OUTPUT INSERTED.* WHERE {where_clause}", sets.join(", "))
}

/// `DELETE FROM … WHERE <policy AND predicates>`.
pub fn build_delete_sql(delete: &querygate_core::DeleteStructure) -> String {
    let dialect = TsqlDialect;
    let table = quoted_table(&dialect, delete.header.source.schema.as_deref(), &delete.header.source.name, &delete.header.source_alias);

    let mut predicates = delete.predicates.clone();
    if let Some(policy) = delete.header.get_db_policy(querygate_core::ElementalOperation::Delete) {
        predicates.push(policy);
    }
    let where_clause = render_predicate(&dialect, &and_join(predicates));
    format!("DELETE FROM {table} WHERE {where_clause}")
}

/// The two-statement T-SQL upsert batch (§4.2, §4.7): a `COUNT` of matching primary keys, then the
/// conditional update/insert whose `OUTPUT INSERTED.*` the executor reads as the second result set.
pub fn build_upsert_batch(upsert: &UpsertStructure) -> (String, String) {
    let dialect = TsqlDialect;
    let table = quoted_table(&dialect, upsert.header.source.schema.as_deref(), &upsert.header.source.name, &upsert.header.source_alias);

    let mut predicates = upsert.predicates.clone();
    if let Some(policy) = upsert.header.get_db_policy(querygate_core::ElementalOperation::Update) {
        predicates.push(policy);
    }
    let where_clause = render_predicate(&dialect, &and_join(predicates));

    let count_statement = format!("SELECT COUNT(*) AS pk_count FROM {table} WHERE {where_clause};");

    let sets: Vec<String> =
        upsert.update_values.iter().map(|(c, v)| format!("{} = {}", dialect.quote_identifier(c), render_value(&dialect, v))).collect();
    let insert_cols: Vec<String> = upsert.insert_values.iter().map(|(c, _)| dialect.quote_identifier(c)).collect();
    let insert_vals: Vec<String> = upsert.insert_values.iter().map(|(_, v)| render_value(&dialect, v)).collect();

    let merge_statement = format!(
        "IF EXISTS (SELECT 1 FROM {table} WHERE {where_clause})\n\
         UPDATE {table} SET {} OUTPUT INSERTED.* WHERE {where_clause};\n\
         ELSE\n\
         INSERT INTO {table} ({}) OUTPUT INSERTED.* VALUES ({});",
        sets.join(", "),
        insert_cols.join(", "),
        insert_vals.join(", ")
    );

    (count_statement, merge_statement)
}

fn render_value(dialect: &TsqlDialect, operand: &PredicateOperand) -> String {
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
        ColumnDef, ColumnType, FilterValue, LabelledColumn, ParameterSink, Predicate, PredicateOp, SourceDefinition,
        StaticMetadataProvider,
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
    fn scenario_1_find_by_id_matches_spec_shape() {
        let md = book_metadata();
        let mut find = FindStructure::new("Book", &md).unwrap();
        let col = find.header.base_column("id");
        let param = find.add_parameter(FilterValue::Int(2), Some("id"));
        find.add_predicate(Predicate::binary(PredicateOperand::column(col), PredicateOp::Equal, PredicateOperand::param(param)));

        let sql = build_find_sql(&find, true);
        assert_eq!(
            sql,
            "SELECT * FROM \"dbo\".\"books\" AS \"table0\" WHERE \"table0\".\"id\" = @param0 FOR JSON PATH, INCLUDE_NULL_VALUES, WITHOUT_ARRAY_WRAPPER"
        );
    }

    #[test]
    fn find_many_has_no_without_array_wrapper() {
        let md = book_metadata();
        let find = FindStructure::new("Book", &md).unwrap();
        let sql = build_find_sql(&find, false);
        assert!(sql.ends_with("FOR JSON PATH, INCLUDE_NULL_VALUES"));
        assert!(!sql.contains("WITHOUT_ARRAY_WRAPPER"));
    }

    #[test]
    fn selected_columns_render_with_labels() {
        let md = book_metadata();
        let mut find = FindStructure::new("Book", &md).unwrap();
        let col = find.header.base_column("title");
        find.add_column(LabelledColumn { column: col, label: "title".into() });
        let sql = build_find_sql(&find, false);
        assert!(sql.contains("\"table0\".\"title\" AS \"title\""));
    }

    #[test]
    fn insert_emits_output_inserted() {
        let md = book_metadata();
        let mut insert = InsertStructure::new("Book", &md).unwrap();
        insert.set_value("title", FilterValue::from("Leviathan Wakes"));
        let sql = build_insert_sql(&insert);
        assert!(sql.starts_with("INSERT INTO \"dbo\".\"books\""));
        assert!(sql.contains("OUTPUT INSERTED.*"));
    }

    #[test]
    fn upsert_batch_has_count_then_conditional_statement() {
        let md = book_metadata();
        let mut upsert = querygate_core::UpsertStructure::new("Book", &md).unwrap();
        upsert.set_value("title", FilterValue::from("Caliban's War"));
        let col = upsert.header.base_column("id");
        let param = upsert.header.add_parameter(FilterValue::Int(7), Some("id"));
        upsert.add_predicate(Predicate::binary(PredicateOperand::column(col), PredicateOp::Equal, PredicateOperand::param(param)));

        let (count_stmt, merge_stmt) = build_upsert_batch(&upsert);
        assert!(count_stmt.starts_with("SELECT COUNT(*) AS pk_count"));
        assert!(merge_stmt.contains("IF EXISTS"));
        assert!(merge_stmt.contains("UPDATE \"dbo\".\"books\""));
        assert!(merge_stmt.contains("INSERT INTO \"dbo\".\"books\""));
    }
}
