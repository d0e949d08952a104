//! # Credential Repository
//!
//! Encrypted persistence of the CRM token pair. Plaintext tokens only exist in
//! memory; rows hold AES-GCM ciphertext bound to the account id.

use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};
use std::sync::Arc;

use crate::crypto::{CryptoKey, decrypt_token, encrypt_token};
use crate::error::CrmError;
use crate::models::credential::{self, Entity as Credential};

/// Decrypted token pair for one account.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub account_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry, epoch milliseconds
    pub expires_at_ms: i64,
    pub api_base_domain: String,
}

impl std::fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokens")
            .field("account_id", &self.account_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at_ms", &self.expires_at_ms)
            .field("api_base_domain", &self.api_base_domain)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CredentialRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl CredentialRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Raw row without decrypting; used for status reporting.
    pub async fn find_record(
        &self,
        account_id: i64,
    ) -> Result<Option<credential::Model>, sea_orm::DbErr> {
        Credential::find_by_id(account_id).one(self.db.as_ref()).await
    }

    /// Loads and decrypts the token pair for `account_id`.
    pub async fn load(&self, account_id: i64) -> Result<Option<StoredTokens>, CrmError> {
        let Some(row) = self.find_record(account_id).await? else {
            return Ok(None);
        };

        let access_token = decrypt_token(&self.crypto_key, account_id, &row.access_token_ciphertext)
            .inspect_err(|_| {
                tracing::error!(account_id, "access token decryption failed");
            })?;
        let refresh_token =
            decrypt_token(&self.crypto_key, account_id, &row.refresh_token_ciphertext)
                .inspect_err(|_| {
                    tracing::error!(account_id, "refresh token decryption failed");
                })?;

        Ok(Some(StoredTokens {
            account_id,
            access_token,
            refresh_token,
            expires_at_ms: row.expires_at_ms,
            api_base_domain: row.api_base_domain,
        }))
    }

    /// Writes the whole token pair in one statement, replacing any previous row.
    pub async fn save(&self, tokens: &StoredTokens) -> Result<(), CrmError> {
        let now = Utc::now().fixed_offset();
        let access = encrypt_token(&self.crypto_key, tokens.account_id, &tokens.access_token)?;
        let refresh = encrypt_token(&self.crypto_key, tokens.account_id, &tokens.refresh_token)?;

        let row = credential::ActiveModel {
            account_id: Set(tokens.account_id),
            access_token_ciphertext: Set(access),
            refresh_token_ciphertext: Set(refresh),
            expires_at_ms: Set(tokens.expires_at_ms),
            api_base_domain: Set(tokens.api_base_domain.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Credential::insert(row)
            .on_conflict(
                OnConflict::column(credential::Column::AccountId)
                    .update_columns([
                        credential::Column::AccessTokenCiphertext,
                        credential::Column::RefreshTokenCiphertext,
                        credential::Column::ExpiresAtMs,
                        credential::Column::ApiBaseDomain,
                        credential::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn repo() -> CredentialRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        CredentialRepository::new(Arc::new(db), CryptoKey::new(vec![7u8; 32]).unwrap())
    }

    fn tokens(access: &str, refresh: &str) -> StoredTokens {
        StoredTokens {
            account_id: 31_000_001,
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_at_ms: 1_700_000_000_000,
            api_base_domain: "agency.amocrm.ru".to_string(),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips_and_overwrites() {
        let repo = repo().await;
        assert!(repo.load(31_000_001).await.unwrap().is_none());

        repo.save(&tokens("a1", "r1")).await.unwrap();
        repo.save(&tokens("a2", "r2")).await.unwrap();

        let loaded = repo.load(31_000_001).await.unwrap().unwrap();
        assert_eq!(loaded, tokens("a2", "r2"));
    }

    #[tokio::test]
    async fn ciphertext_does_not_contain_plaintext() {
        let repo = repo().await;
        repo.save(&tokens("plain-access-token", "plain-refresh-token"))
            .await
            .unwrap();

        let row = repo.find_record(31_000_001).await.unwrap().unwrap();
        let needle = b"plain-access-token";
        assert!(
            !row.access_token_ciphertext
                .windows(needle.len())
                .any(|window| window == needle)
        );
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let rendered = format!("{:?}", tokens("secret-a", "secret-r"));
        assert!(!rendered.contains("secret-a"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
