//! # CRM Integration
//!
//! Token lifecycle management and the typed REST gateway to the CRM account.

pub mod client;
pub mod token;
pub mod types;

pub use client::CrmClient;
pub use token::{ConnectionStatus, TokenManager};

use crate::config::CrmConfig;
use crate::error::CrmError;

const USER_AGENT: &str = concat!("crm-sync/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client; every request inherits the configured timeout.
pub fn build_http_client(config: &CrmConfig) -> Result<reqwest::Client, CrmError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|err| CrmError::Transport {
            operation: "build_http_client",
            message: err.to_string(),
        })
}

/// Longest upstream body kept in errors, logs and API responses.
pub(crate) const BODY_SNIPPET_CHARS: usize = 500;

/// Keeps the head of an upstream error body for logs and API errors.
pub(crate) fn body_snippet(body: &str) -> String {
    if body.chars().count() <= BODY_SNIPPET_CHARS {
        body.to_string()
    } else {
        let head: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{head}...")
    }
}
