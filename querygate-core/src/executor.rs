//! Query Executor scaffolding (§4.4): retry policy, per-user pool key derivation, session-context
//! prelude construction, upsert result classification, and the `QueryEngine` trait each dialect crate
//! implements. Grounded on the donor's `prax-postgres/src/engine.rs` (connection-acquire →
//! params-convert → execute shape) and `prax-query/src/middleware/retry.rs` (`RetryConfig`/
//! `RetryPredicate` shape — the backoff formula and actual re-execution are freshly implemented here,
//! since the donor's retry middleware was a non-retrying passthrough placeholder).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use crate::error::{GatewayError, GatewayResult};
use crate::model::FilterValue;
use crate::structure::Parameter;

/// `delay(n) = 2^n` seconds, capped at 5 additional attempts beyond the first (§4.4 "Retry policy").
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_additional_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_additional_attempts: 5 }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(attempt))
    }
}

/// Dialect-specific transient-error classification (§4.4 "Classification is dialect-specific"). Each
/// dialect crate declares its own SQL-state/error-number set and implements this.
pub trait TransientErrorClassifier: Send + Sync {
    fn is_transient(&self, error: &GatewayError) -> bool;
}

/// Runs `attempt` repeatedly, retrying only while `classifier` reports the error transient and fewer
/// than `policy.max_additional_attempts` retries have been used, sleeping `policy.delay_for_attempt(n)`
/// between tries. Non-transient errors propagate immediately without retrying (§4.4 last sentence).
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    classifier: &dyn TransientErrorClassifier,
    mut attempt: F,
) -> GatewayResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = GatewayResult<T>>,
{
    let mut last_err = None;
    for n in 0..=policy.max_additional_attempts {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if n == policy.max_additional_attempts || !classifier.is_transient(&err) {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for_attempt(n)).await;
                last_err = Some(err);
            }
        }
    }
    // Unreachable in practice — the loop always returns on its last iteration — but keeps the function
    // total without an `unwrap`.
    Err(last_err.unwrap_or_else(|| GatewayError::unexpected("retry loop exited without a result")))
}

/// Derives the per-user connection-pool key `pk = H(issuer || '|' || (oid || sub))`, URL-safe Base64
/// without padding (§4.4 "Per-user connection-pool isolation").
pub fn derive_pool_key(issuer: &str, oid_or_sub: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(issuer.as_bytes());
    hasher.update(b"|");
    hasher.update(oid_or_sub.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Builds `{base_app_name}|obo:{pool_key}`, truncating `base_app_name` (never the suffix) so the total
/// length never exceeds 128 characters (§4.4).
pub fn obo_application_identifier(base_app_name: &str, pool_key: &str) -> String {
    const MAX_LEN: usize = 128;
    let suffix = format!("|obo:{pool_key}");
    let budget = MAX_LEN.saturating_sub(suffix.chars().count());
    let truncated: String = base_app_name.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}

/// Fails with `OboAuthenticationFailure` when the principal lacks the claims OBO needs (§4.4).
pub fn require_obo_identity(oid_or_sub: Option<&FilterValue>) -> GatewayResult<String> {
    match oid_or_sub {
        Some(FilterValue::String(s)) => Ok(s.clone()),
        Some(other) => Ok(format!("{other:?}")),
        None => Err(GatewayError::obo_authentication_failure(
            "on-behalf-of is enabled for this data source but the principal has neither an oid nor a sub claim",
        )),
    }
}

/// Builds the `sp_set_session_context` prelude statements (§4.4, T-SQL only): one per claim, each
/// registering a fresh `@session_paramN` parameter via `register_param`.
pub fn session_context_statements(
    claims: &[(SmolStr, FilterValue)],
    mut register_param: impl FnMut(FilterValue) -> SmolStr,
) -> Vec<String> {
    claims
        .iter()
        .map(|(claim_type, value)| {
            let param = register_param(value.clone());
            format!("EXEC sp_set_session_context '{claim_type}', {param}, @read_only = 0;")
        })
        .collect()
}

/// The §4.7 upsert-classification state machine, factored out as pure logic so it's testable without a
/// database. `n_pk` is the count read from the first result set (`0` or `1`); `rows` is the row count
/// of the second result set; `pretty_pk` is a pre-rendered PK string for the 404 message when available.
pub fn classify_upsert(n_pk: u32, rows: usize, pretty_pk: Option<&str>) -> GatewayResult<bool> {
    match (n_pk, rows) {
        (1, 0) => Err(GatewayError::database_policy_failure()),
        (1, _) => Ok(true),
        (0, 0) => match pretty_pk {
            Some(pk) => Err(GatewayError::item_not_found(format!("record with primary key {pk} not found"))),
            None => Err(GatewayError::unexpected("upsert batch returned no count and no rows")),
        },
        (0, _) => Ok(false),
        _ => Err(GatewayError::unexpected(format!("invalid n_pk value from upsert count result: {n_pk}"))),
    }
}

/// An on-behalf-of identity threaded through a [`QueryEngine`] call (§4.4 "Per-user connection-pool
/// isolation"): which pool the executor should route to instead of the default pool, and — for T-SQL —
/// the session-context claims to stamp via `sp_set_session_context` ahead of the main statement.
#[derive(Debug, Clone)]
pub struct OboIdentity {
    pub issuer: String,
    pub oid_or_sub: String,
    pub session_claims: Vec<(SmolStr, FilterValue)>,
}

/// Per-call execution context: whether the caller expects a find-many (array, coalesced to `[]` on zero
/// rows) or find-one/singleton (`null` on zero rows) result shape (§4.2 scenario 2 vs. scenario 1), and
/// the delegated identity, if any, whose pool and session this call should run under (§4.4, §4.5).
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub singleton: bool,
    pub identity: Option<OboIdentity>,
}

impl ExecutionContext {
    pub fn find_many() -> Self {
        Self::default()
    }

    pub fn find_one() -> Self {
        Self { singleton: true, identity: None }
    }

    pub fn with_identity(mut self, identity: OboIdentity) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// The result of a Find: a single textual JSON payload already shaped by the dialect builder (§4.2
/// "Result shape (Find)").
#[derive(Debug, Clone, PartialEq)]
pub struct FindResult {
    pub json: serde_json::Value,
}

/// The result of an Insert/Update/Delete: the affected row when `RETURNING` is supported, else `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
    pub row: Option<serde_json::Value>,
    pub rows_affected: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub row: Option<serde_json::Value>,
    pub is_update: bool,
}

/// The per-dialect engine's execution surface (§4.5 "Engine Factory" routes to one of these). Each
/// dialect crate's executor implements this against its own connection pool, using `ctx` to pick the
/// default or OBO-derived pool, apply any T-SQL session-context prelude, and classify the find-many
/// zero-row case (§4.2, §4.4).
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn execute_find(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<FindResult>;
    async fn execute_mutation(&self, sql: &str, params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<MutationResult>;
    async fn execute_upsert(&self, statements: &[&str], params: &[Parameter], ctx: &ExecutionContext) -> GatewayResult<UpsertResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_follows_2_pow_n_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn pool_key_is_url_safe_base64_without_padding() {
        let key = derive_pool_key("https://login.example.com", "user-oid-1");
        assert!(!key.contains('+'));
        assert!(!key.contains('/'));
        assert!(!key.contains('='));
    }

    #[test]
    fn scenario_6_distinct_oids_yield_distinct_suffixes_within_length_budget() {
        let key_a = derive_pool_key("https://issuer", "oid-a");
        let key_b = derive_pool_key("https://issuer", "oid-b");
        let app_a = obo_application_identifier("my-very-long-application-name-used-for-this-data-source", &key_a);
        let app_b = obo_application_identifier("my-very-long-application-name-used-for-this-data-source", &key_b);

        assert_ne!(app_a, app_b);
        assert!(app_a.len() <= 128);
        assert!(app_b.len() <= 128);
        assert!(app_a.ends_with(&format!("|obo:{key_a}")));
        assert!(app_b.ends_with(&format!("|obo:{key_b}")));
    }

    #[test]
    fn obo_truncates_base_name_never_the_suffix() {
        let key = derive_pool_key("iss", "oid");
        let huge_name = "x".repeat(500);
        let result = obo_application_identifier(&huge_name, &key);
        assert!(result.len() <= 128);
        assert!(result.ends_with(&format!("|obo:{key}")));
    }

    #[test]
    fn classify_upsert_matches_state_machine() {
        assert!(classify_upsert(1, 0, None).unwrap_err().sub_status() == crate::error::SubStatus::DatabasePolicyFailure);
        assert_eq!(classify_upsert(1, 3, None).unwrap(), true);
        assert_eq!(classify_upsert(0, 1, None).unwrap(), false);
        assert!(classify_upsert(0, 0, Some("id=7")).unwrap_err().sub_status() == crate::error::SubStatus::ItemNotFound);
        assert!(classify_upsert(0, 0, None).unwrap_err().sub_status() == crate::error::SubStatus::UnexpectedError);
    }

    struct AlwaysTransient;
    impl TransientErrorClassifier for AlwaysTransient {
        fn is_transient(&self, _error: &GatewayError) -> bool {
            true
        }
    }

    struct NeverTransient;
    impl TransientErrorClassifier for NeverTransient {
        fn is_transient(&self, _error: &GatewayError) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn retries_until_success_when_transient() {
        let policy = RetryPolicy { max_additional_attempts: 3 };
        let mut calls = 0;
        let result = execute_with_retry(&policy, &AlwaysTransient, |n| {
            calls += 1;
            async move {
                if n < 2 {
                    Err(GatewayError::database_operation_failed("transient", true))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn non_transient_errors_never_retry() {
        let policy = RetryPolicy { max_additional_attempts: 5 };
        let mut calls = 0;
        let result: GatewayResult<i32> = execute_with_retry(&policy, &NeverTransient, |_n| {
            calls += 1;
            async move { Err(GatewayError::bad_request("nope")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_additional_attempts() {
        let policy = RetryPolicy { max_additional_attempts: 2 };
        let mut calls = 0;
        let result: GatewayResult<i32> = execute_with_retry(&policy, &AlwaysTransient, |_n| {
            calls += 1;
            async move { Err(GatewayError::database_operation_failed("always fails", true)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3); // first attempt + 2 retries
    }
}
