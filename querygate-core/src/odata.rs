//! The OData-to-Predicate visitor (§4.1 component list item, §9 "dynamic filter trees → tagged
//! variants").
//!
//! `FilterNode` stands in for the filter-AST producer named as an external collaborator in §6: the
//! textual `$filter=...` parsing itself is out of scope, but the tree it's assumed to hand back is
//! pinned down here as a closed sum type, exactly as §9 specifies: `Binary{op,l,r} | Unary{op,r} |
//! Literal{v} | ColumnRef{…} | ClaimRef{claim_type}`. Grounded on the donor's `prax-query/src/filter.rs`
//! recursive `to_sql_with_params` renderer, generalized from "renders directly to SQL text" into "visits
//! into a `Predicate` tree, with parameter binding going through the shared [`ParameterSink`]".

use smol_str::SmolStr;

use crate::error::{GatewayError, GatewayResult};
use crate::metadata::SourceDefinition;
use crate::model::{Column, FilterValue, Predicate, PredicateOp, PredicateOperand};
use crate::structure::ParameterSink;

/// OData comparison/boolean operators. Distinct from [`PredicateOp`] because the filter AST also needs
/// `Not` (unary boolean negation), which has no SQL-operator counterpart of its own — it's resolved by
/// inverting the child predicate's operator where possible, or wrapping in `NOT (...)` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

impl FilterOp {
    fn to_predicate_op(self) -> Option<PredicateOp> {
        match self {
            Self::Eq => Some(PredicateOp::Equal),
            Self::Ne => Some(PredicateOp::NotEqual),
            Self::Lt => Some(PredicateOp::LessThan),
            Self::Le => Some(PredicateOp::LessOrEqual),
            Self::Gt => Some(PredicateOp::GreaterThan),
            Self::Ge => Some(PredicateOp::GreaterOrEqual),
            Self::And => Some(PredicateOp::And),
            Self::Or => Some(PredicateOp::Or),
            Self::Not => None,
        }
    }
}

/// The closed sum type named in §9: `Binary{op,l,r} | Unary{op,r} | Literal{v} | ColumnRef{…} |
/// ClaimRef{claim_type}`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Binary { op: FilterOp, left: Box<FilterNode>, right: Box<FilterNode> },
    Unary { op: FilterOp, operand: Box<FilterNode> },
    Literal(FilterValue),
    /// A (possibly dotted) field path, e.g. `id` or `author.id`. The visitor resolves the *last*
    /// segment against the entity's `SourceDefinition` (see Open Question #1 in DESIGN.md) — this
    /// tolerates the schema-qualifying concatenation the source policy text uses without requiring this
    /// crate to parse dotted paths itself.
    ColumnRef { path: SmolStr },
    /// `@claims.oid`-style claim placeholder, resolved against the principal at visit time.
    ClaimRef { claim_type: SmolStr },
}

impl FilterNode {
    pub fn binary(op: FilterOp, left: FilterNode, right: FilterNode) -> Self {
        Self::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn not(operand: FilterNode) -> Self {
        Self::Unary { op: FilterOp::Not, operand: Box::new(operand) }
    }

    pub fn column(path: impl Into<SmolStr>) -> Self {
        Self::ColumnRef { path: path.into() }
    }

    pub fn claim(claim_type: impl Into<SmolStr>) -> Self {
        Self::ClaimRef { claim_type: claim_type.into() }
    }

    pub fn literal(value: impl Into<FilterValue>) -> Self {
        Self::Literal(value.into())
    }
}

/// Resolves a claim type (e.g. `"oid"`, `"sub"`, or a custom app-role claim) to the authenticated
/// principal's value for it. Implemented by [`crate::request::Principal`]; kept as a trait here so the
/// visitor doesn't depend on the request module.
pub trait ClaimResolver {
    fn resolve(&self, claim_type: &str) -> GatewayResult<FilterValue>;
}

/// Walks `node`, resolving `ColumnRef`s against `source` and `ClaimRef`s against `claims` (when
/// supplied — request-level filters never carry `ClaimRef`s, so `claims` is `None` for those), emitting
/// parameters through `sink` and returning the resulting predicate tree. One match arm per `FilterNode`
/// variant, per §9's "avoid reflection; register one case per variant".
pub fn visit_filter(
    node: &FilterNode,
    source: &SourceDefinition,
    sink: &mut dyn ParameterSink,
    claims: Option<&dyn ClaimResolver>,
) -> GatewayResult<Predicate> {
    match node {
        FilterNode::Binary { op: FilterOp::And, left, right } => {
            let l = visit_filter(left, source, sink, claims)?;
            let r = visit_filter(right, source, sink, claims)?;
            Ok(l.and(r))
        }
        FilterNode::Binary { op: FilterOp::Or, left, right } => {
            let l = visit_filter(left, source, sink, claims)?;
            let r = visit_filter(right, source, sink, claims)?;
            Ok(l.or(r).parenthesized())
        }
        FilterNode::Binary { op, left, right } => {
            let predicate_op = op.to_predicate_op().ok_or_else(|| {
                GatewayError::bad_request("unsupported comparison operator in filter expression")
            })?;
            let l = visit_operand(left, source, sink, claims)?;
            let r = visit_operand(right, source, sink, claims)?;
            Ok(Predicate::binary(l, predicate_op, r))
        }
        FilterNode::Unary { op: FilterOp::Not, operand } => {
            let inner = visit_filter(operand, source, sink, claims)?;
            Ok(negate(inner))
        }
        FilterNode::Unary { .. } => {
            Err(GatewayError::bad_request("unsupported unary operator in filter expression"))
        }
        FilterNode::ColumnRef { .. } | FilterNode::Literal(_) | FilterNode::ClaimRef { .. } => {
            Err(GatewayError::bad_request("filter expression must be a comparison, not a bare operand"))
        }
    }
}

fn visit_operand(
    node: &FilterNode,
    source: &SourceDefinition,
    sink: &mut dyn ParameterSink,
    claims: Option<&dyn ClaimResolver>,
) -> GatewayResult<PredicateOperand> {
    match node {
        FilterNode::ColumnRef { path } => {
            let field_name = path.rsplit('.').next().unwrap_or(path.as_str());
            let column_def = source.column_by_exposed(field_name).ok_or_else(|| {
                GatewayError::bad_request(format!("Invalid field name: {field_name} cannot be resolved as column"))
            })?;
            Ok(PredicateOperand::Column(Column::new(source.name.clone(), column_def.backing_name.clone())))
        }
        FilterNode::Literal(value) => {
            let param = sink.add_parameter(value.clone(), None);
            Ok(PredicateOperand::param(param))
        }
        FilterNode::ClaimRef { claim_type } => {
            let resolver = claims.ok_or_else(|| {
                GatewayError::authorization_check_failed("policy references a claim outside an authorization context")
            })?;
            let value = resolver.resolve(claim_type)?;
            let param = sink.add_parameter(value, None);
            Ok(PredicateOperand::param(param))
        }
        FilterNode::Binary { .. } | FilterNode::Unary { .. } => {
            Err(GatewayError::bad_request("nested boolean expression used where an operand was expected"))
        }
    }
}

/// Inverts a predicate's operator where a direct inverse exists; otherwise falls back to `NOT (p)`
/// rendered as a unary predicate, so `FilterOp::Not` never has to special-case AND/OR De Morgan
/// expansion.
fn negate(p: Predicate) -> Predicate {
    let inverse = match p.op {
        PredicateOp::Equal => Some(PredicateOp::NotEqual),
        PredicateOp::NotEqual => Some(PredicateOp::Equal),
        PredicateOp::GreaterThan => Some(PredicateOp::LessOrEqual),
        PredicateOp::LessOrEqual => Some(PredicateOp::GreaterThan),
        PredicateOp::LessThan => Some(PredicateOp::GreaterOrEqual),
        PredicateOp::GreaterOrEqual => Some(PredicateOp::LessThan),
        PredicateOp::Like => Some(PredicateOp::NotLike),
        PredicateOp::NotLike => Some(PredicateOp::Like),
        PredicateOp::Is => Some(PredicateOp::IsNot),
        PredicateOp::IsNot => Some(PredicateOp::Is),
        _ => None,
    };
    match inverse {
        Some(op) => Predicate { op, ..p },
        None => Predicate::unary(PredicateOp::Exists, PredicateOperand::Predicate(Box::new(p))).parenthesized(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnDef, ColumnType};
    use crate::structure::FindStructure;
    use crate::metadata::StaticMetadataProvider;

    fn book_source() -> SourceDefinition {
        SourceDefinition::new(
            "books",
            vec![ColumnDef::new("id", ColumnType::Int), ColumnDef::new("title", ColumnType::Text)],
            vec!["id".into()],
        )
    }

    struct NoClaims;
    impl ClaimResolver for NoClaims {
        fn resolve(&self, _claim_type: &str) -> GatewayResult<FilterValue> {
            unreachable!("request-level filters never reference claims")
        }
    }

    #[test]
    fn simple_comparison_resolves_column_and_binds_literal() {
        let source = book_source();
        let md = StaticMetadataProvider::new().register("Book", source.clone());
        let mut find = FindStructure::new("Book", &md).unwrap();

        let node = FilterNode::binary(FilterOp::Lt, FilterNode::column("id"), FilterNode::literal(4i64));
        let predicate = visit_filter(&node, &source, &mut find, Some(&NoClaims)).unwrap();

        assert_eq!(predicate.op, PredicateOp::LessThan);
        match predicate.left {
            PredicateOperand::Column(c) => assert_eq!(c.name, "id"),
            _ => panic!("expected column operand"),
        }
        assert_eq!(find.header.parameters().len(), 1);
    }

    #[test]
    fn and_of_two_comparisons() {
        let source = book_source();
        let md = StaticMetadataProvider::new().register("Book", source.clone());
        let mut find = FindStructure::new("Book", &md).unwrap();

        let node = FilterNode::binary(
            FilterOp::And,
            FilterNode::binary(FilterOp::Lt, FilterNode::column("id"), FilterNode::literal(4i64)),
            FilterNode::binary(FilterOp::Gt, FilterNode::column("id"), FilterNode::literal(1i64)),
        );
        let predicate = visit_filter(&node, &source, &mut find, Some(&NoClaims)).unwrap();
        assert_eq!(predicate.op, PredicateOp::And);
        assert_eq!(find.header.parameters().len(), 2);
    }

    #[test]
    fn unknown_column_is_bad_request() {
        let source = book_source();
        let md = StaticMetadataProvider::new().register("Book", source.clone());
        let mut find = FindStructure::new("Book", &md).unwrap();

        let node = FilterNode::binary(FilterOp::Eq, FilterNode::column("nope"), FilterNode::literal(1i64));
        let err = visit_filter(&node, &source, &mut find, Some(&NoClaims)).unwrap_err();
        assert_eq!(err.sub_status(), crate::error::SubStatus::BadRequest);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn not_inverts_simple_comparison_without_wrapping() {
        let source = book_source();
        let md = StaticMetadataProvider::new().register("Book", source.clone());
        let mut find = FindStructure::new("Book", &md).unwrap();

        let node = FilterNode::not(FilterNode::binary(FilterOp::Eq, FilterNode::column("id"), FilterNode::literal(1i64)));
        let predicate = visit_filter(&node, &source, &mut find, Some(&NoClaims)).unwrap();
        assert_eq!(predicate.op, PredicateOp::NotEqual);
    }
}
