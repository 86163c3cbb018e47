//! The gateway's single error shape: `(message, http_status, sub_status, inner)`.
//!
//! Every fallible operation in this crate returns `GatewayResult<T>`. The HTTP layer is expected to
//! turn a `GatewayError` into a response using `.http_status()`; nothing in this crate renders a
//! response body directly.

use std::fmt;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// The ten sub-status kinds a gateway-facing error can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubStatus {
    EntityNotFound,
    DataSourceNotFound,
    BadRequest,
    InvalidIdentifierField,
    ItemNotFound,
    AuthorizationCheckFailed,
    DatabasePolicyFailure,
    OboAuthenticationFailure,
    DatabaseOperationFailed,
    UnexpectedError,
}

impl SubStatus {
    /// The HTTP status this sub-status maps to. `DatabaseOperationFailed` defaults to 500; callers
    /// that know the dialect-mapped 4xx should use `GatewayError::database_operation_failed_with_status`.
    pub fn default_http_status(self) -> u16 {
        match self {
            Self::EntityNotFound => 404,
            Self::DataSourceNotFound => 400,
            Self::BadRequest => 400,
            Self::InvalidIdentifierField => 400,
            Self::ItemNotFound => 404,
            Self::AuthorizationCheckFailed => 403,
            Self::DatabasePolicyFailure => 403,
            Self::OboAuthenticationFailure => 401,
            Self::DatabaseOperationFailed => 500,
            Self::UnexpectedError => 500,
        }
    }
}

impl fmt::Display for SubStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EntityNotFound => "EntityNotFound",
            Self::DataSourceNotFound => "DataSourceNotFound",
            Self::BadRequest => "BadRequest",
            Self::InvalidIdentifierField => "InvalidIdentifierField",
            Self::ItemNotFound => "ItemNotFound",
            Self::AuthorizationCheckFailed => "AuthorizationCheckFailed",
            Self::DatabasePolicyFailure => "DatabasePolicyFailure",
            Self::OboAuthenticationFailure => "OboAuthenticationFailure",
            Self::DatabaseOperationFailed => "DatabaseOperationFailed",
            Self::UnexpectedError => "UnexpectedError",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("[{sub_status}] {message}")]
pub struct GatewayError {
    pub message: String,
    pub http_status: u16,
    pub sub_status: SubStatus,
    #[source]
    pub inner: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl GatewayError {
    fn new(sub_status: SubStatus, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            http_status: sub_status.default_http_status(),
            sub_status,
            inner: None,
        }
    }

    pub fn with_inner(mut self, inner: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    pub fn entity_not_found(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(SubStatus::EntityNotFound, format!("Entity {entity} not found"))
    }

    pub fn data_source_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(SubStatus::DataSourceNotFound, format!("Data source {name} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(SubStatus::BadRequest, message)
    }

    pub fn invalid_identifier_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(
            SubStatus::InvalidIdentifierField,
            format!("Primary key field {field} does not match the entity definition"),
        )
    }

    pub fn item_not_found(message: impl Into<String>) -> Self {
        Self::new(SubStatus::ItemNotFound, message)
    }

    pub fn authorization_check_failed(message: impl Into<String>) -> Self {
        Self::new(SubStatus::AuthorizationCheckFailed, message)
    }

    pub fn database_policy_failure() -> Self {
        Self::new(
            SubStatus::DatabasePolicyFailure,
            "The policy for this role prevented the mutation from affecting any rows",
        )
    }

    pub fn obo_authentication_failure(message: impl Into<String>) -> Self {
        Self::new(SubStatus::OboAuthenticationFailure, message)
    }

    /// `developer_mode = true` surfaces the raw database message; otherwise a generic sentinel is used,
    /// per §7's propagation policy that production mode never leaks raw driver text.
    pub fn database_operation_failed(message: impl Into<String>, developer_mode: bool) -> Self {
        let message = if developer_mode {
            message.into()
        } else {
            "While processing the request the database ran into an error.".to_string()
        };
        Self::new(SubStatus::DatabaseOperationFailed, message)
    }

    pub fn database_operation_failed_with_status(
        message: impl Into<String>,
        developer_mode: bool,
        http_status: u16,
    ) -> Self {
        Self::database_operation_failed(message, developer_mode).with_http_status(http_status)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(SubStatus::UnexpectedError, message)
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn sub_status(&self) -> SubStatus {
        self.sub_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_http_statuses_match_spec() {
        assert_eq!(SubStatus::EntityNotFound.default_http_status(), 404);
        assert_eq!(SubStatus::DataSourceNotFound.default_http_status(), 400);
        assert_eq!(SubStatus::AuthorizationCheckFailed.default_http_status(), 403);
        assert_eq!(SubStatus::OboAuthenticationFailure.default_http_status(), 401);
        assert_eq!(SubStatus::UnexpectedError.default_http_status(), 500);
    }

    #[test]
    fn developer_mode_surfaces_raw_message() {
        let err = GatewayError::database_operation_failed("duplicate key value", true);
        assert_eq!(err.message, "duplicate key value");

        let err = GatewayError::database_operation_failed("duplicate key value", false);
        assert_ne!(err.message, "duplicate key value");
    }

    #[test]
    fn display_renders_bracketed_sub_status() {
        let err = GatewayError::bad_request("bad filter");
        assert_eq!(err.to_string(), "[BadRequest] bad filter");
    }
}
