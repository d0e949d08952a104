//! # Token Lifecycle Manager
//!
//! Owns the OAuth token pair of the CRM account. Every outbound call asks
//! [`TokenManager::get_valid_access_token`] first; tokens are renewed proactively
//! when they are within the renewal margin of their expiry.
//!
//! A refresh rotates the refresh token, so two concurrent refreshes would leave a
//! stale pair behind. Refreshes are therefore single-flight per account: callers
//! queue on an account-scoped async mutex and re-read the credential once they
//! hold it.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::config::CrmConfig;
use crate::crm::{body_snippet, types::{TokenRequest, TokenResponse}};
use crate::error::CrmError;
use crate::repositories::{CredentialRepository, StoredTokens};

/// Default lifetime assumed for manually stored tokens.
pub const DEFAULT_MANUAL_EXPIRES_IN: i64 = 86_400;

/// True when the access token must be renewed before use.
pub fn needs_refresh(expires_at_ms: i64, now_ms: i64, margin_ms: i64) -> bool {
    now_ms > expires_at_ms - margin_ms
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionStatus {
    /// A credential is stored for the account
    pub connected: bool,
    /// The stored access token is past its expiry (a refresh will be attempted)
    pub access_token_expired: bool,
    pub domain: String,
    pub account_id: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct TokenManager {
    credentials: CredentialRepository,
    http: reqwest::Client,
    config: CrmConfig,
    refresh_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(credentials: CredentialRepository, http: reqwest::Client, config: CrmConfig) -> Self {
        Self {
            credentials,
            http,
            config,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn account_id(&self) -> i64 {
        self.config.account_id
    }

    fn margin_ms(&self) -> i64 {
        i64::try_from(self.config.token_renewal_margin_seconds)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000)
    }

    fn token_url(&self) -> String {
        format!("{}/oauth2/access_token", self.config.base_url())
    }

    fn refresh_lock(&self, account_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        locks.entry(account_id).or_default().clone()
    }

    async fn load_required(&self, account_id: i64) -> Result<StoredTokens, CrmError> {
        self.credentials.load(account_id).await?.ok_or_else(|| {
            CrmError::Unauthorized(
                "no CRM credential stored; complete the OAuth authorization first".to_string(),
            )
        })
    }

    /// Returns an access token that is valid for at least the renewal margin.
    ///
    /// Fails with [`CrmError::Unauthorized`] when no credential exists or the CRM
    /// rejects the refresh token; both need a human to re-authorize.
    pub async fn get_valid_access_token(&self) -> Result<String, CrmError> {
        let account_id = self.config.account_id;
        let tokens = self.load_required(account_id).await?;
        if !needs_refresh(tokens.expires_at_ms, Utc::now().timestamp_millis(), self.margin_ms()) {
            return Ok(tokens.access_token);
        }

        let lock = self.refresh_lock(account_id);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        let tokens = self.load_required(account_id).await?;
        if !needs_refresh(tokens.expires_at_ms, Utc::now().timestamp_millis(), self.margin_ms()) {
            return Ok(tokens.access_token);
        }

        let refreshed = self.refresh(&tokens).await?;
        Ok(refreshed.access_token)
    }

    #[instrument(skip_all, fields(account_id = tokens.account_id))]
    async fn refresh(&self, tokens: &StoredTokens) -> Result<StoredTokens, CrmError> {
        let request = TokenRequest {
            client_id: self.config.client_id.as_deref().unwrap_or_default(),
            client_secret: self.config.client_secret.as_deref().unwrap_or_default(),
            grant_type: "refresh_token",
            code: None,
            refresh_token: Some(&tokens.refresh_token),
            redirect_uri: &self.config.redirect_uri,
        };

        match self.request_tokens("refresh_token", &request).await {
            Ok(response) => {
                let stored = self.persist(response).await?;
                counter!("crm_token_refresh_total", "outcome" => "success").increment(1);
                info!(expires_at_ms = stored.expires_at_ms, "CRM access token refreshed");
                Ok(stored)
            }
            Err(CrmError::Upstream { status, body, .. }) if (400..500).contains(&status) => {
                counter!("crm_token_refresh_total", "outcome" => "rejected").increment(1);
                warn!(status, body = %body, "CRM rejected the refresh token; re-authorization required");
                Err(CrmError::Unauthorized(format!(
                    "refresh token rejected by CRM (status {status}); re-authorization required"
                )))
            }
            Err(err) => {
                counter!("crm_token_refresh_total", "outcome" => "error").increment(1);
                warn!(error = %err, "CRM token refresh failed");
                Err(err)
            }
        }
    }

    /// One-time code-for-token exchange that establishes the credential.
    #[instrument(skip_all, fields(account_id = self.config.account_id))]
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<(), CrmError> {
        if code.trim().is_empty() {
            return Err(CrmError::Validation("authorization code is required".to_string()));
        }

        let request = TokenRequest {
            client_id: self.config.client_id.as_deref().unwrap_or_default(),
            client_secret: self.config.client_secret.as_deref().unwrap_or_default(),
            grant_type: "authorization_code",
            code: Some(code),
            refresh_token: None,
            redirect_uri: &self.config.redirect_uri,
        };

        let lock = self.refresh_lock(self.config.account_id);
        let _guard = lock.lock().await;

        let response = self
            .request_tokens("exchange_authorization_code", &request)
            .await
            .inspect_err(|err| warn!(error = %err, "authorization code exchange failed"))?;
        self.persist(response).await?;
        info!("CRM credential established from authorization code");
        Ok(())
    }

    /// Stores an externally obtained token pair, e.g. a long-lived integration token.
    pub async fn store_tokens_manually(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in: Option<i64>,
    ) -> Result<(), CrmError> {
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(CrmError::Validation(
                "access_token and refresh_token are required".to_string(),
            ));
        }
        let expires_in = expires_in.unwrap_or(DEFAULT_MANUAL_EXPIRES_IN);
        if expires_in <= 0 {
            return Err(CrmError::Validation("expires_in must be positive".to_string()));
        }

        let lock = self.refresh_lock(self.config.account_id);
        let _guard = lock.lock().await;

        self.persist(TokenResponse {
            token_type: "Bearer".to_string(),
            expires_in,
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
        })
        .await?;
        info!(account_id = self.config.account_id, "CRM tokens stored manually");
        Ok(())
    }

    pub async fn connection_status(&self) -> Result<ConnectionStatus, CrmError> {
        let account_id = self.config.account_id;
        let record = self.credentials.find_record(account_id).await?;
        let now_ms = Utc::now().timestamp_millis();

        Ok(match record {
            Some(row) => ConnectionStatus {
                connected: true,
                access_token_expired: now_ms > row.expires_at_ms,
                domain: row.api_base_domain,
                account_id,
                expires_at: DateTime::from_timestamp_millis(row.expires_at_ms),
                updated_at: Some(row.updated_at.with_timezone(&Utc)),
            },
            None => ConnectionStatus {
                connected: false,
                access_token_expired: false,
                domain: self.config.domain.clone(),
                account_id,
                expires_at: None,
                updated_at: None,
            },
        })
    }

    async fn request_tokens(
        &self,
        operation: &'static str,
        request: &TokenRequest<'_>,
    ) -> Result<TokenResponse, CrmError> {
        let response = self
            .http
            .post(self.token_url())
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|err| CrmError::from_reqwest(operation, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CrmError::Upstream {
                operation,
                status: status.as_u16(),
                body: body_snippet(&body),
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| CrmError::Decode {
                operation,
                message: err.to_string(),
            })
    }

    async fn persist(&self, response: TokenResponse) -> Result<StoredTokens, CrmError> {
        let expires_at_ms = Utc::now()
            .timestamp_millis()
            .saturating_add(response.expires_in.saturating_mul(1000));
        let stored = StoredTokens {
            account_id: self.config.account_id,
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at_ms,
            api_base_domain: self.config.domain.clone(),
        };
        self.credentials.save(&stored).await?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_boundary_uses_margin() {
        let now = 1_000_000_000;
        let margin = 5 * 60 * 1000;

        assert!(needs_refresh(now + 4 * 60 * 1000, now, margin));
        assert!(!needs_refresh(now + 10 * 60 * 1000, now, margin));
        assert!(needs_refresh(now - 1, now, margin));
        assert!(!needs_refresh(now + margin, now, margin));
    }
}
