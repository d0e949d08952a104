//! Test utilities: in-memory database, test configuration pointed at a mock CRM,
//! application state and credential seeding.

#![allow(dead_code)]

use anyhow::Result;
use chrono::Utc;
use crm_sync::config::{AppConfig, CrmConfig, SchedulerConfig, SyncConfig};
use crm_sync::crypto::CryptoKey;
use crm_sync::repositories::{CredentialRepository, StoredTokens};
use crm_sync::server::AppState;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use std::sync::Arc;

pub const ACCOUNT_ID: i64 = 31_000_001;
pub const OPERATOR_TOKEN: &str = "test-operator-token";
pub const TEST_KEY: [u8; 32] = [7u8; 32];

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Configuration whose CRM calls all resolve against `crm_base` (a wiremock URI).
pub fn test_config(crm_base: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        crypto_key: Some(TEST_KEY.to_vec()),
        webhook_secret: None,
        crm: CrmConfig {
            domain: "agency.amocrm.ru".to_string(),
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            redirect_uri: "https://app.example.com/crm/oauth/callback".to_string(),
            account_id: ACCOUNT_ID,
            api_base: Some(crm_base.to_string()),
            request_timeout_ms: 5_000,
            token_renewal_margin_seconds: 300,
        },
        sync: SyncConfig {
            concurrency: 4,
            follow_up_task_seconds: 3600,
            lead_pull_limit: 50,
        },
        scheduler: SchedulerConfig {
            enabled: false,
            ..SchedulerConfig::default()
        },
        ..AppConfig::default()
    }
}

/// Fresh database plus fully wired application state.
pub async fn test_state(config: AppConfig) -> Result<(AppState, DatabaseConnection)> {
    let db = setup_test_db().await?;
    let state = AppState::new(config, db.clone())?;
    Ok((state, db))
}

pub fn credential_repository(db: &DatabaseConnection) -> Result<CredentialRepository> {
    Ok(CredentialRepository::new(
        Arc::new(db.clone()),
        CryptoKey::new(TEST_KEY.to_vec())?,
    ))
}

/// Stores a token pair expiring `expires_in_secs` from now (negative = expired).
pub async fn seed_credential(
    db: &DatabaseConnection,
    access_token: &str,
    expires_in_secs: i64,
) -> Result<()> {
    credential_repository(db)?
        .save(&StoredTokens {
            account_id: ACCOUNT_ID,
            access_token: access_token.to_string(),
            refresh_token: "refresh-0".to_string(),
            expires_at_ms: Utc::now().timestamp_millis() + expires_in_secs * 1000,
            api_base_domain: "agency.amocrm.ru".to_string(),
        })
        .await?;
    Ok(())
}

pub fn token_response(access_token: &str, refresh_token: &str, expires_in: i64) -> Value {
    json!({
        "token_type": "Bearer",
        "expires_in": expires_in,
        "access_token": access_token,
        "refresh_token": refresh_token
    })
}

pub fn pipelines_body(stage_name: &str) -> Value {
    json!({
        "_total_items": 1,
        "_embedded": {
            "pipelines": [{
                "id": 10,
                "name": "Sales",
                "sort": 1,
                "is_main": true,
                "is_unsorted_on": true,
                "account_id": ACCOUNT_ID,
                "_embedded": {
                    "statuses": [
                        {"id": 100, "name": "Incoming", "sort": 10, "is_editable": false, "pipeline_id": 10, "color": "#c1c1c1", "type": 1},
                        {"id": 200, "name": stage_name, "sort": 20, "is_editable": true, "pipeline_id": 10, "color": "#99ccff", "type": 0},
                        {"id": 142, "name": "Successfully realized", "sort": 10000, "is_editable": false, "pipeline_id": 10, "color": "#CCFF66", "type": 0},
                        {"id": 143, "name": "Closed and not realized", "sort": 11000, "is_editable": false, "pipeline_id": 10, "color": "#D5D8DB", "type": 0}
                    ]
                }
            }]
        }
    })
}

pub fn lead_body(id: i64, name: &str, status_id: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "price": 0,
        "status_id": status_id,
        "pipeline_id": 10,
        "responsible_user_id": 5001,
        "created_at": 1_700_000_000,
        "updated_at": 1_700_000_500,
        "_embedded": {"contacts": [{"id": 77}]}
    })
}

pub fn created_body(entity: &str, id: i64) -> Value {
    json!({
        "_links": {"self": {"href": format!("https://agency.amocrm.ru/api/v4/{entity}")}},
        "_embedded": {entity: [{"id": id, "request_id": "0"}]}
    })
}
