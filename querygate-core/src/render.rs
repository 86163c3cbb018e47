//! Dialect-parameterized rendering of the predicate/column model into SQL text (§4.2
//! "Dialect-neutral behavior"). Every SQL builder crate implements [`Dialect`] for its own quoting rules
//! and calls these functions instead of re-deriving column/predicate rendering — the "keep HOW, replace
//! WHAT" piece of the transformation: the donor's `prax-query/src/sql.rs` `SqlBuilder` did exactly this
//! rendering job for one hardcoded dialect set; here it's generalized to take any [`Dialect`].

use crate::model::{Column, JoinStructure, Predicate, PredicateOperand};

/// What a SQL dialect builder must supply for the shared renderers in this module: identifier quoting.
/// Everything else (column form selection, predicate joins, operator keywords) is dialect-neutral per
/// §4.2 and lives here once.
pub trait Dialect {
    /// Wraps `identifier` in the dialect's delimiter, escaping any embedded delimiter (§4.2 "Quoting").
    fn quote_identifier(&self, identifier: &str) -> String;
}

/// Column rendering, three forms preferred top-to-bottom (§4.2):
/// 1. `table_alias` present → `"alias"."col"`.
/// 2. else `schema` present → `"schema"."table"."col"`.
/// 3. else → `"table"."col"`.
pub fn render_column(dialect: &dyn Dialect, column: &Column) -> String {
    let col = dialect.quote_identifier(&column.name);
    if let Some(alias) = &column.table_alias {
        format!("{}.{}", dialect.quote_identifier(alias), col)
    } else if let Some(schema) = &column.schema {
        format!("{}.{}.{}", dialect.quote_identifier(schema), dialect.quote_identifier(&column.table), col)
    } else {
        format!("{}.{}", dialect.quote_identifier(&column.table), col)
    }
}

fn render_operand(dialect: &dyn Dialect, operand: &PredicateOperand) -> String {
    match operand {
        PredicateOperand::Column(c) => render_column(dialect, c),
        PredicateOperand::Literal(text) => text.to_string(),
        PredicateOperand::Predicate(p) => render_predicate(dialect, p),
        PredicateOperand::NestedStructure(sql) => format!("( {sql} )"),
    }
}

/// Binary → `L op R`; unary (`EXISTS`) → `op ( R )`; parens added around the whole predicate iff
/// `add_parens` is set (§4.2 "Predicate rendering").
pub fn render_predicate(dialect: &dyn Dialect, predicate: &Predicate) -> String {
    let body = if predicate.op.is_binary() {
        format!(
            "{} {} {}",
            render_operand(dialect, &predicate.left),
            predicate.op.sql_keyword(),
            render_operand(dialect, &predicate.right)
        )
    } else {
        format!("{} ( {} )", predicate.op.sql_keyword(), render_operand(dialect, &predicate.right))
    };
    if predicate.add_parens {
        format!("({body})")
    } else {
        body
    }
}

/// `INNER JOIN "schema"."object" AS "alias" ON <predicates>`, schema omitted when absent (§4.2 "Join
/// rendering"). Join predicates are AND-joined by the caller via [`crate::model::and_join`] before being
/// passed here as a single `Predicate`.
pub fn render_join(dialect: &dyn Dialect, join: &JoinStructure, on_predicate: &Predicate) -> String {
    let object = match &join.schema {
        Some(schema) => format!("{}.{}", dialect.quote_identifier(schema), dialect.quote_identifier(&join.object)),
        None => dialect.quote_identifier(&join.object),
    };
    format!(
        "INNER JOIN {object} AS {} ON {}",
        dialect.quote_identifier(&join.alias),
        render_predicate(dialect, on_predicate)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PredicateOp};

    struct AnsiDialect;
    impl Dialect for AnsiDialect {
        fn quote_identifier(&self, identifier: &str) -> String {
            format!("\"{}\"", identifier.replace('"', "\"\""))
        }
    }

    #[test]
    fn column_prefers_table_alias_over_schema() {
        let col = Column::new("books", "id").with_alias("table0").with_schema("dbo");
        assert_eq!(render_column(&AnsiDialect, &col), "\"table0\".\"id\"");
    }

    #[test]
    fn column_falls_back_to_schema_then_table() {
        let with_schema = Column::new("books", "id").with_schema("dbo");
        assert_eq!(render_column(&AnsiDialect, &with_schema), "\"dbo\".\"books\".\"id\"");

        let bare = Column::new("books", "id");
        assert_eq!(render_column(&AnsiDialect, &bare), "\"books\".\"id\"");
    }

    #[test]
    fn predicate_parens_applied_only_when_flagged() {
        let p = Predicate::binary(
            PredicateOperand::param("@param0"),
            PredicateOp::Equal,
            PredicateOperand::param("@param1"),
        );
        assert_eq!(render_predicate(&AnsiDialect, &p), "@param0 = @param1");
        assert_eq!(render_predicate(&AnsiDialect, &p.clone().parenthesized()), "(@param0 = @param1)");
    }

    #[test]
    fn identifier_with_delimiter_round_trips_through_escaping() {
        let quoted = AnsiDialect.quote_identifier("weird\"name");
        assert_eq!(quoted, "\"weird\"\"name\"");
    }
}
