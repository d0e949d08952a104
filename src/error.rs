//! # Error Handling
//!
//! [`CrmError`] is the error taxonomy of the sync engine; [`ApiError`] is the
//! problem+json envelope every HTTP handler returns, carrying the request trace id.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::crm::body_snippet;
use crate::crypto::CryptoError;
use crate::telemetry;

/// Failures raised by the token manager, the CRM gateway and the reconcilers.
#[derive(Debug, Error)]
pub enum CrmError {
    /// No credential stored, or the refresh token was rejected. Needs a human to
    /// re-run the OAuth consent flow; never retried.
    #[error("CRM authorization required: {0}")]
    Unauthorized(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    /// Non-2xx answer from the CRM.
    #[error("CRM {operation} failed with status {status}: {body}")]
    Upstream {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("CRM {operation} request failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    #[error("CRM {operation} timed out")]
    Timeout { operation: &'static str },
    #[error("CRM {operation} returned an unexpected payload: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("credential encryption error: {0}")]
    Crypto(#[from] CryptoError),
}

impl CrmError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Network-level failures and upstream 5xx; everything else is semantic.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Classifies a reqwest failure for `operation`.
    pub fn from_reqwest(operation: &'static str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout { operation }
        } else if error.is_decode() {
            Self::Decode {
                operation,
                message: error.to_string(),
            }
        } else {
            Self::Transport {
                operation,
                message: error.to_string(),
            }
        }
    }

    /// Short machine-readable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound { .. } => "not_found",
            Self::Upstream { .. } => "upstream",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Decode { .. } => "decode",
            Self::Validation(_) => "validation",
            Self::Database(_) => "database",
            Self::Crypto(_) => "crypto",
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Request trace id, or a short correlation id outside a request scope.
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
}

/// Upstream CRM error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpstreamErrorDetails {
    /// Gateway operation that failed (e.g. `get_lead`)
    pub operation: String,
    /// HTTP status code from upstream
    pub status: u16,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<CrmError> for ApiError {
    fn from(error: CrmError) -> Self {
        match error {
            CrmError::Unauthorized(message) => Self::new(
                StatusCode::UNAUTHORIZED,
                "CRM_UNAUTHORIZED".to_string(),
                format!("CRM authorization required: {message}"),
            ),
            CrmError::NotFound { entity, id } => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND".to_string(),
                format!("{entity} {id} not found"),
            ),
            CrmError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED".to_string(), message)
            }
            CrmError::Upstream {
                operation,
                status,
                body,
            } => upstream_error(operation, status, Some(body)),
            err @ (CrmError::Transport { .. } | CrmError::Timeout { .. }) => {
                tracing::warn!(error = %err, "CRM unreachable");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE".to_string(),
                    err.to_string(),
                )
                .with_retry_after(30)
            }
            CrmError::Decode { operation, message } => {
                tracing::error!(operation, %message, "CRM payload could not be decoded");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_ERROR".to_string(),
                    format!("CRM {operation} returned an unexpected payload"),
                )
            }
            CrmError::Database(db) => db.into(),
            CrmError::Crypto(err) => {
                tracing::error!(error = %err, "credential encryption failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
        }
    }
}

/// 502 for a non-2xx CRM answer, with the body cut to a short snippet.
pub fn upstream_error(operation: &str, status: u16, body: Option<String>) -> ApiError {
    let details = UpstreamErrorDetails {
        operation: operation.to_string(),
        status,
        body_snippet: body.as_deref().map(body_snippet),
    };

    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "PROVIDER_ERROR".to_string(),
        format!("CRM {} returned error status {}", operation, status),
    )
    .with_details(json!(details))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Test error message")
            .with_details(json!({"field": "value"}));

        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
    }

    #[test]
    fn test_content_type_and_retry_after_headers() {
        let response = ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "down",
        )
        .with_retry_after(60)
        .into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
        assert_eq!(response.headers().get("retry-after").unwrap(), "60");
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "X", "Test error");

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn upstream_errors_map_to_bad_gateway_with_details() {
        let api: ApiError = CrmError::Upstream {
            operation: "get_lead",
            status: 404,
            body: "{\"title\":\"Not Found\"}".to_string(),
        }
        .into();

        assert_eq!(api.status, StatusCode::BAD_GATEWAY);
        assert_eq!(api.code, Box::from("PROVIDER_ERROR"));
        let details = api.details.unwrap();
        assert_eq!(details["operation"], "get_lead");
        assert_eq!(details["status"], 404);
    }

    #[test]
    fn crm_error_status_mapping() {
        let cases: Vec<(CrmError, StatusCode)> = vec![
            (
                CrmError::Unauthorized("no credential".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (CrmError::not_found("stage", 5), StatusCode::NOT_FOUND),
            (
                CrmError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CrmError::Timeout {
                    operation: "list_leads",
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CrmError::Database(sea_orm::DbErr::RecordNotFound("x".into())),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (error, expected) in cases {
            let api: ApiError = error.into();
            assert_eq!(api.status, expected);
        }
    }

    #[test]
    fn transient_classification() {
        assert!(CrmError::Timeout { operation: "x" }.is_transient());
        assert!(
            CrmError::Upstream {
                operation: "x",
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !CrmError::Upstream {
                operation: "x",
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!CrmError::Unauthorized("x".into()).is_transient());
    }

    #[test]
    fn test_utf8_safe_truncation() {
        let body = "Ошибка сервера 🚀 ".repeat(60);
        let error = upstream_error("create_lead", 500, Some(body));

        let details = error.details.unwrap();
        let snippet = details["body_snippet"].as_str().unwrap();
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), crate::crm::BODY_SNIPPET_CHARS + 3);
        assert!(snippet.starts_with("Ошибка сервера"));
    }
}
