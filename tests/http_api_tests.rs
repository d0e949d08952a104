//! HTTP surface exercised through the router with `tower::ServiceExt::oneshot`.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use crm_sync::server::create_app;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod test_utils;
use test_utils::{OPERATOR_TOKEN, pipelines_body, seed_credential, test_config, test_state};

async fn app_for(server: &MockServer) -> (Router, sea_orm::DatabaseConnection) {
    let (state, db) = test_state(test_config(&server.uri())).await.unwrap();
    (create_app(state), db)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn operator(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {OPERATOR_TOKEN}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn health_and_openapi_are_public() {
    let server = MockServer::start().await;
    let (app, _db) = app_for(&server).await;

    let (status, body) = send(
        &app,
        Request::get("/healthz").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");

    let (status, body) = send(
        &app,
        Request::get("/openapi.json").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/crm/webhook"].is_object());
}

#[tokio::test]
async fn operator_endpoints_require_bearer_token() {
    let server = MockServer::start().await;
    let (app, _db) = app_for(&server).await;

    let (status, body) = send(
        &app,
        Request::get("/crm/status").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let wrong = Request::get("/crm/status")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, wrong).await.0, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, operator("GET", "/crm/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], false);
}

#[tokio::test]
async fn manual_credentials_show_up_in_status() {
    let server = MockServer::start().await;
    let (app, _db) = app_for(&server).await;

    let (status, body) = send(
        &app,
        operator(
            "PUT",
            "/crm/credentials",
            Some(json!({"access_token": "a", "refresh_token": "r", "expires_in": 3600})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], true);
    assert_eq!(body["access_token_expired"], false);
}

#[tokio::test]
async fn unknown_stage_mapping_returns_404() {
    let server = MockServer::start().await;
    let (app, _db) = app_for(&server).await;

    let (status, body) = send(
        &app,
        operator(
            "PUT",
            "/crm/stages/999/mapping",
            Some(json!({"status": "NEW"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn sync_trigger_records_a_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/leads/pipelines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pipelines_body("Negotiation")))
        .mount(&server)
        .await;
    let (app, db) = app_for(&server).await;
    seed_credential(&db, "access-0", 3600).await.unwrap();

    let (status, body) = send(&app, operator("POST", "/crm/sync/pipelines", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"synced": 1, "errors": 0}));

    let (status, body) = send(&app, operator("GET", "/crm/pipelines", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["stages"].as_array().unwrap().len(), 4);

    let (status, _) = send(&app, operator("GET", "/crm/pipelines/11/stages", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, operator("GET", "/crm/sync-runs?limit=5", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["kind"], "pipelines");
    assert_eq!(body[0]["triggered_by"], "manual");
    assert_eq!(body[0]["status"], "success");
}

#[tokio::test]
async fn sync_without_credential_is_401() {
    let server = MockServer::start().await;
    let (app, _db) = app_for(&server).await;

    let (status, body) = send(&app, operator("POST", "/crm/sync/roles", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "CRM_UNAUTHORIZED");
}

#[tokio::test]
async fn export_of_unknown_lead_is_404() {
    let server = MockServer::start().await;
    let (app, _db) = app_for(&server).await;

    let uri = format!("/crm/leads/{}/export", Uuid::new_v4());
    let (status, _) = send(&app, operator("POST", &uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_is_always_acknowledged() {
    let server = MockServer::start().await;
    let (app, _db) = app_for(&server).await;

    let request = Request::post("/crm/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"leads": {"delete": [{"id": 1}]}}).to_string()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "processed": 0, "errors": 0}));

    let request = Request::post("/crm/webhook")
        .body(Body::from("leads[update][0][id]=1"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"], 1);
}

#[tokio::test]
async fn webhook_secret_is_enforced_when_configured() {
    let server = MockServer::start().await;
    let mut config = test_config(&server.uri());
    config.webhook_secret = Some("s3cret".to_string());
    let (state, _db) = test_state(config).await.unwrap();
    let app = create_app(state);

    let request = Request::post("/crm/webhook")
        .body(Body::from("{}"))
        .unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::UNAUTHORIZED);

    let request = Request::post("/crm/webhook?secret=s3cret")
        .body(Body::from("{}"))
        .unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::OK);

    let request = Request::post("/crm/webhook")
        .header("x-webhook-secret", "s3cret")
        .body(Body::from("{}"))
        .unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::OK);
}

#[tokio::test]
async fn oauth_callback_surfaces_rejected_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/access_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "hint": "Authorization code has expired"
        })))
        .mount(&server)
        .await;
    let (app, _db) = app_for(&server).await;

    let (status, _) = send(
        &app,
        Request::get("/crm/oauth/callback").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Request::get("/crm/oauth/callback?code=stale&referer=agency.amocrm.ru")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "AUTHORIZATION_REJECTED");
    assert!(
        body["details"]["body"]
            .as_str()
            .unwrap()
            .contains("Authorization code has expired")
    );
}
