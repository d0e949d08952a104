//! # Authentication
//!
//! Operator bearer authentication for the manual trigger and admin endpoints, and
//! the optional shared secret on the inbound webhook.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::server::AppState;

/// Header carrying the webhook shared secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Rejects requests without a configured operator bearer token.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    validate_token(&config, token)?;

    tracing::debug!("authenticated operator request");
    request.extensions_mut().insert(OperatorAuth);
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    ConstantTimeEq::ct_eq(left.as_bytes(), right.as_bytes()).into()
}

fn validate_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| constant_time_eq(token, configured));

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

/// Checks the webhook shared secret when one is configured. The secret may come in
/// the `X-Webhook-Secret` header or the `secret` query parameter.
pub fn verify_webhook_secret(
    config: &AppConfig,
    headers: &HeaderMap,
    query_secret: Option<&str>,
) -> Result<(), ApiError> {
    let Some(expected) = config.webhook_secret.as_deref() else {
        return Ok(());
    };

    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .or(query_secret);

    match presented {
        Some(secret) if constant_time_eq(secret, expected) => Ok(()),
        _ => Err(unauthorized(Some("Invalid webhook secret"))),
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{HeaderValue, Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    fn create_test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            operator_tokens: vec!["test-token-123".to_string(), "second".to_string()],
            webhook_secret: Some("hook-secret".to_string()),
            ..Default::default()
        })
    }

    async fn run_middleware(config: Arc<AppConfig>, request: Request<Body>) -> Response {
        async fn handler() -> &'static str {
            "OK"
        }

        Router::new()
            .route("/test", get(handler))
            .layer(axum::middleware::from_fn_with_state(config, auth_middleware))
            .oneshot(request)
            .await
            .unwrap()
    }

    fn request(authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/test");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let response = run_middleware(create_test_config(), request(None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_auth_scheme_returns_401() {
        let response =
            run_middleware(create_test_config(), request(Some("Basic dGVzdA=="))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_token_returns_401() {
        let response = run_middleware(create_test_config(), request(Some("Bearer nope"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn any_configured_token_passes_through() {
        for token in ["Bearer test-token-123", "Bearer second"] {
            let response = run_middleware(create_test_config(), request(Some(token))).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn webhook_secret_accepts_header_or_query() {
        let config = create_test_config();
        let mut headers = HeaderMap::new();

        assert!(verify_webhook_secret(&config, &headers, None).is_err());
        assert!(verify_webhook_secret(&config, &headers, Some("wrong")).is_err());
        assert!(verify_webhook_secret(&config, &headers, Some("hook-secret")).is_ok());

        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("hook-secret"));
        assert!(verify_webhook_secret(&config, &headers, None).is_ok());
    }

    #[test]
    fn webhook_secret_is_optional() {
        let config = AppConfig::default();
        assert!(verify_webhook_secret(&config, &HeaderMap::new(), None).is_ok());
    }
}
