//! Authorization Policy Processor (§4.3).
//!
//! Resolves the per-`(entity, role, operation)` database policy text, parses it into a [`FilterNode`],
//! substitutes claim values from the authenticated principal, and walks it with the OData-to-Predicate
//! visitor — exactly the pipeline the donor's `prax-schema/src/ast/policy.rs` and
//! `prax-mssql/src/rls.rs` cover for *static*, migration-time row-level-security DDL, reworked here into
//! *dynamic*, per-request predicate emission against a live [`QueryStructureHeader`].

use smol_str::SmolStr;

use crate::error::{GatewayError, GatewayResult};
use crate::metadata::SourceDefinition;
use crate::odata::{visit_filter, FilterNode};
use crate::request::Principal;
use crate::structure::{CompoundOperation, ElementalOperation, QueryStructureHeader};

/// Resolves policy text for `(entity, role, operation)`. Implementations typically read this from the
/// same configuration that declares the entity's permissions; `None`/empty means "no row-level
/// restriction for this elemental operation" (§4.3 step 3).
pub trait PolicyProvider: Send + Sync {
    fn policy_text(&self, entity: &str, role: &str, op: ElementalOperation) -> Option<SmolStr>;
}

/// Runs the full §4.3 algorithm for one elemental operation: rejects a principal with no role claim
/// (step 1) before doing anything else, then — if the policy text is non-empty — appends the resulting
/// predicate to `header` under `op`. A no-op when the policy is absent or blank (once past the role
/// check) — this is what makes *policy predicate commutativity* (§8) hold: zero registered policies is
/// indistinguishable, downstream, from never having called this function.
pub fn apply_policy(
    header: &mut QueryStructureHeader,
    source: &SourceDefinition,
    op: ElementalOperation,
    policies: &dyn PolicyProvider,
    principal: &Principal,
) -> GatewayResult<()> {
    let role = principal.require_role()?;

    let Some(text) = policies.policy_text(&header.entity_name, role, op) else { return Ok(()) };
    if text.trim().is_empty() {
        return Ok(());
    }

    let ast = parse_policy_filter(&text)
        .map_err(|e| GatewayError::authorization_check_failed(format!("malformed policy for {role}: {e}")))?;

    let predicate = visit_filter(&ast, source, header, Some(principal))
        .map_err(|e| GatewayError::authorization_check_failed(e.message))?;

    header.add_policy_predicate(op, predicate);
    Ok(())
}

/// Expands a compound operation into its elementals and applies the policy to each (§4.3 step 4):
/// `Upsert → {Update, Create}`. The role check in [`apply_policy`] runs once per elemental, which is
/// harmless — it's a cheap `Option::as_deref` — and keeps this function a thin loop rather than a second
/// place that has to remember to check the role first.
pub fn apply_compound_policy(
    header: &mut QueryStructureHeader,
    source: &SourceDefinition,
    compound: CompoundOperation,
    policies: &dyn PolicyProvider,
    principal: &Principal,
) -> GatewayResult<()> {
    for elemental in compound.elementals() {
        apply_policy(header, source, elemental, policies, principal)?;
    }
    Ok(())
}

/// A minimal recursive-descent parser for the policy-text grammar this gateway's policies use:
/// `@item.field` / `@claims.type` operands, `eq ne lt le gt ge` comparisons, `and`/`or` with standard
/// precedence (`and` binds tighter than `or`), and parenthesized subexpressions. This is the
/// "collaborator filter parser" named in §4.3 step 5b, implemented locally since no textual OData parser
/// ships with this crate (§1 — general OData parsing is an external collaborator; this is a narrow
/// grammar subset sufficient for policy text specifically).
fn parse_policy_filter(text: &str) -> Result<FilterNode, String> {
    let tokens = tokenize(text)?;
    let mut parser = PolicyParser { tokens, pos: 0 };
    let node = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected trailing input at token {}", parser.pos));
    }
    Ok(node)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    StringLit(String),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == '\'' {
            let start = i + 1;
            let mut j = start;
            while j < chars.len() && chars[j] != '\'' {
                j += 1;
            }
            if j >= chars.len() {
                return Err("unterminated string literal".to_string());
            }
            tokens.push(Token::StringLit(chars[start..j].iter().collect()));
            i = j + 1;
        } else if c == '-' || c.is_ascii_digit() {
            let start = i;
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                j += 1;
            }
            let text: String = chars[start..j].iter().collect();
            let n = text.parse::<f64>().map_err(|_| format!("invalid number literal: {text}"))?;
            tokens.push(Token::Number(n));
            i = j;
        } else if c.is_alphabetic() || c == '@' || c == '_' {
            let start = i;
            let mut j = i + 1;
            while j < chars.len()
                && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '.' || chars[j] == '@')
            {
                j += 1;
            }
            tokens.push(Token::Ident(chars[start..j].iter().collect()));
            i = j;
        } else {
            return Err(format!("unexpected character '{c}' in policy text"));
        }
    }
    Ok(tokens)
}

struct PolicyParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl PolicyParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_ident(&mut self, expected: &str) -> bool {
        if let Some(Token::Ident(s)) = self.peek() {
            if s.eq_ignore_ascii_case(expected) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn parse_or(&mut self) -> Result<FilterNode, String> {
        let mut node = self.parse_and()?;
        while self.expect_ident("or") {
            let rhs = self.parse_and()?;
            node = FilterNode::binary(crate::odata::FilterOp::Or, node, rhs);
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<FilterNode, String> {
        let mut node = self.parse_primary()?;
        while self.expect_ident("and") {
            let rhs = self.parse_primary()?;
            node = FilterNode::binary(crate::odata::FilterOp::And, node, rhs);
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<FilterNode, String> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let node = self.parse_or()?;
            match self.advance() {
                Some(Token::RParen) => Ok(node),
                _ => Err("expected closing parenthesis".to_string()),
            }
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<FilterNode, String> {
        let left = self.parse_operand()?;
        let op_ident = match self.advance() {
            Some(Token::Ident(s)) => s,
            other => return Err(format!("expected comparison operator, found {other:?}")),
        };
        let op = match op_ident.to_ascii_lowercase().as_str() {
            "eq" => crate::odata::FilterOp::Eq,
            "ne" => crate::odata::FilterOp::Ne,
            "lt" => crate::odata::FilterOp::Lt,
            "le" => crate::odata::FilterOp::Le,
            "gt" => crate::odata::FilterOp::Gt,
            "ge" => crate::odata::FilterOp::Ge,
            other => return Err(format!("unknown comparison operator: {other}")),
        };
        let right = self.parse_operand()?;
        Ok(FilterNode::binary(op, left, right))
    }

    fn parse_operand(&mut self) -> Result<FilterNode, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(FilterNode::literal(n as i64)),
            Some(Token::StringLit(s)) => Ok(FilterNode::literal(s)),
            Some(Token::Ident(ident)) => {
                if let Some(rest) = ident.strip_prefix("@claims.") {
                    Ok(FilterNode::claim(rest))
                } else if let Some(rest) = ident.strip_prefix("@item.") {
                    Ok(FilterNode::column(rest))
                } else {
                    Ok(FilterNode::column(ident))
                }
            }
            other => Err(format!("expected operand, found {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnDef, ColumnType, StaticMetadataProvider};
    use crate::request::Principal;
    use crate::structure::FindStructure;

    fn book_source() -> SourceDefinition {
        SourceDefinition::new("books", vec![ColumnDef::new("id", ColumnType::Int)], vec!["id".into()])
    }

    struct SinglePolicy(&'static str);
    impl PolicyProvider for SinglePolicy {
        fn policy_text(&self, _entity: &str, _role: &str, _op: ElementalOperation) -> Option<SmolStr> {
            Some(self.0.into())
        }
    }

    struct NoPolicy;
    impl PolicyProvider for NoPolicy {
        fn policy_text(&self, _entity: &str, _role: &str, _op: ElementalOperation) -> Option<SmolStr> {
            None
        }
    }

    #[test]
    fn scenario_5_policy_applied_any_dialect() {
        let source = book_source();
        let md = StaticMetadataProvider::new().register("Book", source.clone());
        let mut find = FindStructure::new("Book", &md).unwrap();
        let policies = SinglePolicy("@item.id ne 1234 or @item.id gt 1940");
        let principal = Principal::new("database_policy_tester");

        apply_policy(&mut find.header, &source, ElementalOperation::Read, &policies, &principal).unwrap();

        let predicate = find.header.get_db_policy(ElementalOperation::Read).unwrap();
        assert_eq!(predicate.op, crate::model::PredicateOp::Or);
    }

    #[test]
    fn commutativity_no_policy_yields_none() {
        let source = book_source();
        let md = StaticMetadataProvider::new().register("Book", source.clone());
        let mut find = FindStructure::new("Book", &md).unwrap();
        let principal = Principal::new("anonymous");

        apply_policy(&mut find.header, &source, ElementalOperation::Read, &NoPolicy, &principal).unwrap();
        assert!(find.header.get_db_policy(ElementalOperation::Read).is_none());
    }

    #[test]
    fn compound_upsert_applies_to_both_elementals() {
        let source = book_source();
        let md = StaticMetadataProvider::new().register("Book", source.clone());
        let mut find = FindStructure::new("Book", &md).unwrap();
        let policies = SinglePolicy("@item.id gt 0");
        let principal = Principal::new("writer");

        apply_compound_policy(&mut find.header, &source, CompoundOperation::Upsert, &policies, &principal).unwrap();

        assert!(find.header.get_db_policy(ElementalOperation::Update).is_some());
        assert!(find.header.get_db_policy(ElementalOperation::Create).is_some());
    }

    #[test]
    fn missing_role_via_require_role_is_authorization_check_failed() {
        let principal = Principal::default();
        let err = principal.require_role().unwrap_err();
        assert_eq!(err.sub_status(), crate::error::SubStatus::AuthorizationCheckFailed);
    }

    #[test]
    fn apply_policy_rejects_a_principal_with_no_role_before_touching_policy_text() {
        let source = book_source();
        let md = StaticMetadataProvider::new().register("Book", source.clone());
        let mut find = FindStructure::new("Book", &md).unwrap();
        let principal = Principal::default();

        let err = apply_policy(&mut find.header, &source, ElementalOperation::Read, &NoPolicy, &principal).unwrap_err();
        assert_eq!(err.sub_status(), crate::error::SubStatus::AuthorizationCheckFailed);
    }
}
