//! Stand-ins for the upstream REST/GraphQL request parser (§1, §6): `NormalizedRequest` and the
//! authenticated `Principal`. Neither is the spec's hard part, but both are needed to drive the Query
//! Structure and Policy Processor end-to-end without a real HTTP layer (§1.2 expansion).

use std::collections::HashMap;

use smol_str::SmolStr;

use crate::error::{GatewayError, GatewayResult};
use crate::model::{FilterValue, KeysetPagePredicate};
use crate::odata::{ClaimResolver, FilterNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
    Upsert,
    UpsertIncremental,
    Execute,
}

/// The normalized request record named in §6: `{entity, operation, primary_key?, filter_ast?,
/// select_fields?, order_by?, first?, after?, body?}`.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub entity: SmolStr,
    pub operation: Operation,
    pub primary_key: Vec<(SmolStr, FilterValue)>,
    pub filter_ast: Option<FilterNode>,
    pub select_fields: Option<Vec<SmolStr>>,
    pub order_by: Vec<(SmolStr, crate::model::SortDirection)>,
    pub first: Option<u32>,
    pub after: Vec<KeysetPagePredicate>,
    pub body: HashMap<SmolStr, FilterValue>,
}

impl NormalizedRequest {
    pub fn new(entity: impl Into<SmolStr>, operation: Operation) -> Self {
        Self {
            entity: entity.into(),
            operation,
            primary_key: Vec::new(),
            filter_ast: None,
            select_fields: None,
            order_by: Vec::new(),
            first: None,
            after: Vec::new(),
            body: HashMap::new(),
        }
    }

    /// `$first = 0` is always `BadRequest` (§8 boundary behavior).
    pub fn validate_first(&self) -> GatewayResult<()> {
        if self.first == Some(0) {
            return Err(GatewayError::bad_request("$first must be greater than zero"));
        }
        Ok(())
    }

    /// Empty `$select=` is `BadRequest` with the exact message named in §8.
    pub fn validate_select(&self) -> GatewayResult<()> {
        if let Some(fields) = &self.select_fields {
            if fields.is_empty() || fields.iter().any(|f| f.trim().is_empty()) {
                return Err(GatewayError::bad_request("Invalid Field name: null or white space"));
            }
        }
        Ok(())
    }
}

/// The authenticated caller: a role header plus a claim map, and (for OBO flows) the raw bearer JWT.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub role: Option<SmolStr>,
    pub claims: HashMap<SmolStr, FilterValue>,
    pub bearer_token: Option<String>,
}

impl Principal {
    pub fn new(role: impl Into<SmolStr>) -> Self {
        Self { role: Some(role.into()), claims: HashMap::new(), bearer_token: None }
    }

    pub fn with_claim(mut self, claim_type: impl Into<SmolStr>, value: impl Into<FilterValue>) -> Self {
        self.claims.insert(claim_type.into(), value.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// `oid` preferred, `sub` fallback — the exact precedence §4.4's per-user pool key derivation uses.
    pub fn oid_or_sub(&self) -> Option<&FilterValue> {
        self.claims.get("oid").or_else(|| self.claims.get("sub"))
    }

    /// Required role header absence → `AuthorizationCheckFailed` (§4.3 step 1).
    pub fn require_role(&self) -> GatewayResult<&str> {
        self.role.as_deref().ok_or_else(|| {
            GatewayError::authorization_check_failed("Authorization header must include a role claim")
        })
    }
}

impl ClaimResolver for Principal {
    fn resolve(&self, claim_type: &str) -> GatewayResult<FilterValue> {
        self.claims.get(claim_type).cloned().ok_or_else(|| {
            GatewayError::authorization_check_failed(format!("missing required claim: {claim_type}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_zero_is_bad_request() {
        let mut req = NormalizedRequest::new("Book", Operation::Read);
        req.first = Some(0);
        assert!(req.validate_first().is_err());
    }

    #[test]
    fn empty_select_is_bad_request_with_exact_message() {
        let mut req = NormalizedRequest::new("Book", Operation::Read);
        req.select_fields = Some(vec![]);
        let err = req.validate_select().unwrap_err();
        assert_eq!(err.message, "Invalid Field name: null or white space");
    }

    #[test]
    fn oid_preferred_over_sub() {
        let principal = Principal::new("reader").with_claim("oid", "u1").with_claim("sub", "u2");
        assert_eq!(principal.oid_or_sub(), Some(&FilterValue::String("u1".into())));
    }

    #[test]
    fn missing_role_fails_require_role() {
        let principal = Principal::default();
        assert!(principal.require_role().is_err());
    }
}
