//! Token lifecycle against a mock CRM token endpoint.

use crm_sync::error::CrmError;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod test_utils;
use test_utils::{ACCOUNT_ID, seed_credential, test_config, test_state, token_response};

fn refresh_mock(expected_calls: u64) -> Mock {
    Mock::given(method("POST"))
        .and(path("/oauth2/access_token"))
        .and(body_partial_json(json!({
            "grant_type": "refresh_token",
            "refresh_token": "refresh-0",
            "client_id": "client-id"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_response("access-1", "refresh-1", 86400)),
        )
        .expect(expected_calls)
}

#[tokio::test]
async fn token_within_margin_is_refreshed() {
    let server = MockServer::start().await;
    refresh_mock(1).mount(&server).await;
    let (state, db) = test_state(test_config(&server.uri())).await.unwrap();
    seed_credential(&db, "access-0", 4 * 60).await.unwrap();

    let token = state.tokens.get_valid_access_token().await.unwrap();
    assert_eq!(token, "access-1");

    // The rotated pair is persisted.
    let stored = test_utils::credential_repository(&db)
        .unwrap()
        .load(ACCOUNT_ID)
        .await
        .unwrap()
        .expect("credential stored");
    assert_eq!(stored.access_token, "access-1");
    assert_eq!(stored.refresh_token, "refresh-1");
}

#[tokio::test]
async fn token_outside_margin_is_reused() {
    let server = MockServer::start().await;
    refresh_mock(0).mount(&server).await;
    let (state, db) = test_state(test_config(&server.uri())).await.unwrap();
    seed_credential(&db, "access-0", 10 * 60).await.unwrap();

    let token = state.tokens.get_valid_access_token().await.unwrap();
    assert_eq!(token, "access-0");
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/access_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response("access-1", "refresh-1", 86400))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (state, db) = test_state(test_config(&server.uri())).await.unwrap();
    seed_credential(&db, "access-0", -60).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let tokens = state.tokens.clone();
        handles.push(tokio::spawn(async move {
            tokens.get_valid_access_token().await
        }));
    }

    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token, "access-1");
    }
}

#[tokio::test]
async fn rejected_refresh_token_requires_reauthorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/access_token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "title": "Unauthorized",
            "hint": "Token has been revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (state, db) = test_state(test_config(&server.uri())).await.unwrap();
    seed_credential(&db, "access-0", -60).await.unwrap();

    let err = state.tokens.get_valid_access_token().await.unwrap_err();
    assert!(matches!(err, CrmError::Unauthorized(_)), "got {err:?}");
}

#[tokio::test]
async fn missing_credential_is_unauthorized() {
    let server = MockServer::start().await;
    let (state, _db) = test_state(test_config(&server.uri())).await.unwrap();

    let err = state.tokens.get_valid_access_token().await.unwrap_err();
    assert!(matches!(err, CrmError::Unauthorized(_)));

    let status = state.tokens.connection_status().await.unwrap();
    assert!(!status.connected);
    assert_eq!(status.account_id, ACCOUNT_ID);
}

#[tokio::test]
async fn authorization_code_exchange_establishes_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/access_token"))
        .and(body_partial_json(json!({
            "grant_type": "authorization_code",
            "code": "one-time-code",
            "redirect_uri": "https://app.example.com/crm/oauth/callback"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_response("access-9", "refresh-9", 86400)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (state, _db) = test_state(test_config(&server.uri())).await.unwrap();

    state
        .tokens
        .exchange_authorization_code("one-time-code")
        .await
        .unwrap();

    let status = state.tokens.connection_status().await.unwrap();
    assert!(status.connected);
    assert!(!status.access_token_expired);
    assert_eq!(
        state.tokens.get_valid_access_token().await.unwrap(),
        "access-9"
    );
}

#[tokio::test]
async fn manual_tokens_default_to_one_day() {
    let server = MockServer::start().await;
    let (state, _db) = test_state(test_config(&server.uri())).await.unwrap();

    state
        .tokens
        .store_tokens_manually("long-lived", "refresh-x", None)
        .await
        .unwrap();

    let status = state.tokens.connection_status().await.unwrap();
    let expires_at = status.expires_at.expect("expiry recorded");
    let remaining = expires_at - chrono::Utc::now();
    assert!(remaining > chrono::Duration::hours(23));
    assert!(remaining <= chrono::Duration::hours(24));

    let err = state
        .tokens
        .store_tokens_manually("", "refresh-x", None)
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Validation(_)));
}
