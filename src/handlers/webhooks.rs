//! # Webhook Handler
//!
//! Inbound CRM change notifications. A delivery that passes the shared-secret
//! check is always acknowledged with 200 so the CRM does not redeliver; per-event
//! failures are reported in the body and logged.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::auth::verify_webhook_secret;
use crate::error::ApiError;
use crate::server::AppState;
use crate::sync::WebhookOutcome;

#[derive(Debug, Deserialize, IntoParams)]
pub struct WebhookQuery {
    /// Shared secret, for senders that cannot set headers
    pub secret: Option<String>,
}

/// Webhook acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
    pub processed: u32,
    pub errors: u32,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        Self {
            status: "ok".to_string(),
            processed: outcome.processed,
            errors: outcome.errors,
        }
    }
}

/// Receives a CRM webhook delivery
#[utoipa::path(
    post,
    path = "/crm/webhook",
    params(
        WebhookQuery,
        ("X-Webhook-Secret" = Option<String>, Header, description = "Shared secret")
    ),
    request_body(content = Option<JsonValue>, description = "CRM change notification", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck),
        (status = 401, description = "Missing or invalid shared secret", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    verify_webhook_secret(&state.config, &headers, query.secret.as_deref())?;

    let payload: JsonValue = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, bytes = body.len(), "unparseable webhook body");
            return Ok(Json(WebhookOutcome { processed: 0, errors: 1 }.into()));
        }
    };

    let outcome = state.webhooks.handle(&payload).await;
    info!(
        processed = outcome.processed,
        errors = outcome.errors,
        "webhook delivery handled"
    );
    Ok(Json(outcome.into()))
}
