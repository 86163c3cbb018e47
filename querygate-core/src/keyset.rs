//! The keyset-pagination algorithm (§4.2 "Keyset pagination"), factored out so all three SQL dialects
//! (and DOC-DB) build the identical predicate tree and only differ in how they render it to text.

use smol_str::SmolStr;

use crate::model::{
    and_join, Column, KeysetPagePredicate, OrderByColumn, Predicate, PredicateOp, PredicateOperand,
    SortDirection,
};
use crate::structure::ParameterSink;

/// Builds the predicate tree for an ordered cursor list `C = [(c1,v1,d1),…,(ck,vk,dk)]`:
/// - `k = 1`: `c1 cmp(d1) v1` (or `IS NULL` when `v1` is null).
/// - `k > 1`: an OR of `k` parenthesized conjuncts, conjunct *i* equating `c1..c(i-1)` and comparing `ci`.
///
/// `column_for` maps a backing column name to the fully aliased [`Column`] it should render as; callers
/// pass a closure bound to the structure's source alias.
pub fn build_keyset_predicate(
    entries: &[KeysetPagePredicate],
    column_for: impl Fn(&str) -> Column,
    sink: &mut dyn ParameterSink,
) -> Predicate {
    assert!(!entries.is_empty(), "keyset predicate requires at least one cursor entry");

    if entries.len() == 1 {
        return comparison_or_null(&entries[0], &column_for, sink);
    }

    let mut conjuncts = Vec::with_capacity(entries.len());
    for i in 0..entries.len() {
        let mut parts = Vec::with_capacity(i + 1);
        for entry in &entries[..i] {
            parts.push(equality_or_null(entry, &column_for, sink));
        }
        parts.push(comparison_or_null(&entries[i], &column_for, sink));
        conjuncts.push(and_join(parts).parenthesized());
    }

    let mut iter = conjuncts.into_iter();
    let first = iter.next().unwrap();
    iter.fold(first, |acc, next| acc.or(next))
}

fn comparison_or_null(
    entry: &KeysetPagePredicate,
    column_for: &impl Fn(&str) -> Column,
    sink: &mut dyn ParameterSink,
) -> Predicate {
    let column = column_for(&entry.column);
    if entry.value.is_null() {
        return Predicate::binary(
            PredicateOperand::Column(column),
            PredicateOp::Is,
            PredicateOperand::Literal(SmolStr::new_inline("NULL")),
        );
    }
    let op = match entry.direction {
        SortDirection::Asc => PredicateOp::GreaterThan,
        SortDirection::Desc => PredicateOp::LessThan,
    };
    let param = sink.add_parameter(entry.value.clone(), Some(entry.column.as_str()));
    Predicate::binary(PredicateOperand::Column(column), op, PredicateOperand::param(param))
}

fn equality_or_null(
    entry: &KeysetPagePredicate,
    column_for: &impl Fn(&str) -> Column,
    sink: &mut dyn ParameterSink,
) -> Predicate {
    let column = column_for(&entry.column);
    if entry.value.is_null() {
        return Predicate::binary(
            PredicateOperand::Column(column),
            PredicateOp::Is,
            PredicateOperand::Literal(SmolStr::new_inline("NULL")),
        );
    }
    let param = sink.add_parameter(entry.value.clone(), Some(entry.column.as_str()));
    Predicate::binary(PredicateOperand::Column(column), PredicateOp::Equal, PredicateOperand::param(param))
}

/// Appends primary-key columns to `requested` (in PK order) when not already present, defaulting their
/// direction to ASC, guaranteeing a total order (§4.2 last sentence, §3 invariant).
pub fn total_order_by(requested: Vec<OrderByColumn>, primary_key: &[SmolStr], column_for: impl Fn(&str) -> Column) -> Vec<OrderByColumn> {
    let mut ordered = requested;
    for pk in primary_key {
        if !ordered.iter().any(|o| o.column.name == *pk) {
            ordered.push(OrderByColumn { column: column_for(pk), direction: SortDirection::Asc });
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayResult;
    use crate::model::FilterValue;

    struct CollectingSink(Vec<(SmolStr, FilterValue)>);
    impl ParameterSink for CollectingSink {
        fn add_parameter(&mut self, value: FilterValue, backing_column: Option<&str>) -> SmolStr {
            let name: SmolStr = format!("@param{}", self.0.len()).into();
            self.0.push((backing_column.unwrap_or("").into(), value));
            name
        }
    }

    fn col(name: &str) -> Column {
        Column::new("reviews", name).with_alias("table0")
    }

    #[test]
    fn single_column_ascending() -> GatewayResult<()> {
        let entries = vec![KeysetPagePredicate { column: "id".into(), value: FilterValue::Int(567), direction: SortDirection::Asc }];
        let mut sink = CollectingSink(Vec::new());
        let predicate = build_keyset_predicate(&entries, col, &mut sink);
        assert_eq!(predicate.op, PredicateOp::GreaterThan);
        Ok(())
    }

    #[test]
    fn scenario_3_composite_pk_matches_spec_example() {
        // book_id > 1 OR (book_id = 1 AND id > 567)
        let entries = vec![
            KeysetPagePredicate { column: "book_id".into(), value: FilterValue::Int(1), direction: SortDirection::Asc },
            KeysetPagePredicate { column: "id".into(), value: FilterValue::Int(567), direction: SortDirection::Asc },
        ];
        let mut sink = CollectingSink(Vec::new());
        let predicate = build_keyset_predicate(&entries, col, &mut sink);
        assert_eq!(predicate.op, PredicateOp::Or);

        let PredicateOperand::Predicate(left) = &predicate.left else { panic!("expected nested predicate") };
        assert_eq!(left.op, PredicateOp::GreaterThan);
        assert!(left.add_parens);

        let PredicateOperand::Predicate(right) = &predicate.right else { panic!("expected nested predicate") };
        assert_eq!(right.op, PredicateOp::And);
        assert!(right.add_parens);
    }

    #[test]
    fn total_order_by_appends_missing_pk_ascending() {
        let ordered = total_order_by(vec![], &["id".into()], col);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].direction, SortDirection::Asc);
    }

    #[test]
    fn total_order_by_does_not_duplicate_existing_pk() {
        let existing = vec![OrderByColumn { column: col("id"), direction: SortDirection::Desc }];
        let ordered = total_order_by(existing, &["id".into()], col);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].direction, SortDirection::Desc);
    }
}
