//! Tagged-variant predicate and column model shared by every dialect builder.
//!
//! This is the dialect-agnostic half of §4.2: `Column`, `Predicate`, `PredicateOperand`,
//! `JoinStructure`, and the keyset-pagination tuple. Rendering these into dialect SQL text lives in
//! [`crate::render`], parameterized over a small [`crate::dialect::Dialect`] trait so the three SQL
//! builder crates reuse one implementation of "how" and only supply their own quoting/JSON-shaping
//! "what". Grounded on the donor's `prax-query/src/filter.rs` `Filter` enum, generalized from a single
//! Postgres-style renderer into this dialect-parameterized form.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A value bound as a SQL parameter or carried as a cursor/claim value. Mirrors the donor's
/// `FilterValue`, trimmed to the scalar kinds this gateway actually binds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Json(serde_json::Value),
}

impl FilterValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Sort / keyset comparison direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// `cmp(ASC) = '>'`, `cmp(DESC) = '<'` (§4.2 keyset algorithm).
    pub fn keyset_cmp(self) -> &'static str {
        match self {
            Self::Asc => ">",
            Self::Desc => "<",
        }
    }

    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A column reference, pre-resolution-order per §4.2's three rendering forms.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub table_alias: Option<SmolStr>,
    pub schema: Option<SmolStr>,
    pub table: SmolStr,
    pub name: SmolStr,
}

impl Column {
    pub fn new(table: impl Into<SmolStr>, name: impl Into<SmolStr>) -> Self {
        Self {
            table_alias: None,
            schema: None,
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<SmolStr>) -> Self {
        self.table_alias = Some(alias.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<SmolStr>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// `Column AS label`, used in SELECT lists and dialect JSON-shaping.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelledColumn {
    pub column: Column,
    pub label: SmolStr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregationOp {
    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationColumn {
    pub op: AggregationOp,
    pub column: Column,
    pub label: SmolStr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByColumn {
    pub column: Column,
    pub direction: SortDirection,
}

/// The operator map named in §4.2: `= > < >= <= != AND OR LIKE "NOT LIKE" IS "IS NOT" EXISTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Equal,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    NotEqual,
    And,
    Or,
    Like,
    NotLike,
    Is,
    IsNot,
    Exists,
}

impl PredicateOp {
    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::NotEqual => "!=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
            Self::Exists => "EXISTS",
        }
    }

    /// True for the binary comparison/boolean operators; false only for `Exists`, the one unary op.
    pub fn is_binary(self) -> bool {
        !matches!(self, Self::Exists)
    }
}

/// Leaf of a predicate tree: a column, an already-rendered literal/parameter token, a nested predicate,
/// or pre-rendered nested-structure SQL text (used for `EXISTS (subquery)`). §3's `PredicateOperand`.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateOperand {
    Column(Column),
    /// Raw SQL text: either a parameter placeholder (`@param3`) or a dialect literal (`1`, `NULL`).
    Literal(SmolStr),
    Predicate(Box<Predicate>),
    NestedStructure(SmolStr),
}

impl PredicateOperand {
    pub fn param(name: impl Into<SmolStr>) -> Self {
        Self::Literal(name.into())
    }

    pub fn column(col: Column) -> Self {
        Self::Column(col)
    }
}

/// Binary/unary expression with an `add_parens` flag (§3, §4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub left: PredicateOperand,
    pub op: PredicateOp,
    pub right: PredicateOperand,
    pub add_parens: bool,
}

impl Predicate {
    pub fn binary(left: PredicateOperand, op: PredicateOp, right: PredicateOperand) -> Self {
        assert!(op.is_binary(), "binary() called with the unary Exists operator");
        Self { left, op, right, add_parens: false }
    }

    /// `EXISTS ( <subquery> )`. The `left` operand is unused by unary rendering but kept populated with
    /// an empty literal so the struct stays uniform instead of growing an `Option`.
    pub fn unary(op: PredicateOp, right: PredicateOperand) -> Self {
        assert!(!op.is_binary(), "unary() called with a binary operator");
        Self { left: PredicateOperand::Literal(SmolStr::new_inline("")), op, right, add_parens: false }
    }

    pub fn parenthesized(mut self) -> Self {
        self.add_parens = true;
        self
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::binary(
            PredicateOperand::Predicate(Box::new(self)),
            PredicateOp::And,
            PredicateOperand::Predicate(Box::new(other)),
        )
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::binary(
            PredicateOperand::Predicate(Box::new(self)),
            PredicateOp::Or,
            PredicateOperand::Predicate(Box::new(other)),
        )
    }
}

/// `INNER JOIN "schema"."object" AS "alias" ON <predicates>` (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStructure {
    pub schema: Option<SmolStr>,
    pub object: SmolStr,
    pub alias: SmolStr,
    pub predicates: Vec<Predicate>,
}

/// One tuple of the ordered keyset cursor list (§3 `KeysetPagePredicate`).
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetPagePredicate {
    pub column: SmolStr,
    pub value: FilterValue,
    pub direction: SortDirection,
}

/// Joins a non-empty list of predicates with `AND`, or returns the base `1 = 1` predicate when the list
/// is empty (§4.2 "Predicate list join"). Folds right-to-left so the resulting tree mirrors how a human
/// would parenthesize a left-associative AND chain.
pub fn and_join(mut predicates: Vec<Predicate>) -> Predicate {
    match predicates.len() {
        0 => base_predicate(),
        1 => predicates.remove(0),
        _ => {
            let mut iter = predicates.into_iter();
            let first = iter.next().unwrap();
            iter.fold(first, |acc, next| acc.and(next))
        }
    }
}

/// The dialect-canonical `1 = 1` tautology used whenever a predicate list would otherwise be empty.
pub fn base_predicate() -> Predicate {
    Predicate::binary(
        PredicateOperand::Literal(SmolStr::new_inline("1")),
        PredicateOp::Equal,
        PredicateOperand::Literal(SmolStr::new_inline("1")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_join_of_empty_list_is_base_predicate() {
        let p = and_join(vec![]);
        assert_eq!(p, base_predicate());
    }

    #[test]
    fn and_join_of_single_predicate_is_identity() {
        let only = Predicate::binary(
            PredicateOperand::column(Column::new("books", "id")),
            PredicateOp::Equal,
            PredicateOperand::param("@param0"),
        );
        assert_eq!(and_join(vec![only.clone()]), only);
    }

    #[test]
    fn and_join_of_many_nests_left_to_right() {
        let a = Predicate::binary(PredicateOperand::param("@param0"), PredicateOp::Equal, PredicateOperand::param("@param1"));
        let b = Predicate::binary(PredicateOperand::param("@param2"), PredicateOp::Equal, PredicateOperand::param("@param3"));
        let c = Predicate::binary(PredicateOperand::param("@param4"), PredicateOp::Equal, PredicateOperand::param("@param5"));
        let joined = and_join(vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(joined.op, PredicateOp::And);
        // (a AND b) AND c
        match joined.left {
            PredicateOperand::Predicate(inner) => assert_eq!(inner.op, PredicateOp::And),
            _ => panic!("expected nested predicate"),
        }
    }
}
