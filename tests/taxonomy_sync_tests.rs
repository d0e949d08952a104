//! Taxonomy mirror and stage mapping against a mock CRM.

use crm_sync::models::LeadStatus;
use crm_sync::scheduler::{Sweep, Trigger};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod test_utils;
use test_utils::{pipelines_body, seed_credential, test_config, test_state};

async fn mount_pipelines(server: &MockServer, stage_name: &str) {
    Mock::given(method("GET"))
        .and(path("/api/v4/leads/pipelines"))
        .and(header("authorization", "Bearer access-0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pipelines_body(stage_name)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn pipeline_sync_is_idempotent() {
    let server = MockServer::start().await;
    mount_pipelines(&server, "Negotiation").await;
    let (state, db) = test_state(test_config(&server.uri())).await.unwrap();
    seed_credential(&db, "access-0", 3600).await.unwrap();

    let first = state
        .runner
        .run(Sweep::Pipelines, Trigger::Manual, None)
        .await
        .unwrap();
    assert_eq!(first.synced, 1);
    assert_eq!(first.errors, 0);

    let pipelines_after_first = state.taxonomy.count_pipelines().await.unwrap();
    let stages_after_first = state.taxonomy.count_stages().await.unwrap();

    let second = state
        .runner
        .run(Sweep::Pipelines, Trigger::Manual, None)
        .await
        .unwrap();
    assert_eq!(second.synced, 1);

    assert_eq!(state.taxonomy.count_pipelines().await.unwrap(), pipelines_after_first);
    assert_eq!(state.taxonomy.count_stages().await.unwrap(), stages_after_first);
    assert_eq!(stages_after_first, 4);

    let runs = state.sync_runs.recent(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.kind == "pipelines" && run.status == "success"));
}

#[tokio::test]
async fn mapping_survives_resync_and_rename() {
    let server = MockServer::start().await;
    mount_pipelines(&server, "Negotiation").await;
    let (state, db) = test_state(test_config(&server.uri())).await.unwrap();
    seed_credential(&db, "access-0", 3600).await.unwrap();

    state
        .runner
        .run(Sweep::Pipelines, Trigger::Manual, None)
        .await
        .unwrap();
    state
        .mapper
        .update_stage_mapping(200, Some(LeadStatus::InProgress))
        .await
        .unwrap();

    server.reset().await;
    mount_pipelines(&server, "Talks with owner").await;
    state
        .runner
        .run(Sweep::Pipelines, Trigger::Manual, None)
        .await
        .unwrap();

    let stage = state.taxonomy.find_stage(200).await.unwrap().unwrap();
    assert_eq!(stage.name, "Talks with owner");
    assert_eq!(stage.mapped_status, Some(LeadStatus::InProgress));
}

#[tokio::test]
async fn suggestions_and_auto_mapping_cover_known_stages() {
    let server = MockServer::start().await;
    mount_pipelines(&server, "Negotiation").await;
    let (state, db) = test_state(test_config(&server.uri())).await.unwrap();
    seed_credential(&db, "access-0", 3600).await.unwrap();
    state
        .runner
        .run(Sweep::Pipelines, Trigger::Manual, None)
        .await
        .unwrap();

    let suggestions = state.mapper.suggest_mappings().await.unwrap();
    let by_stage: Vec<(i64, LeadStatus)> = suggestions
        .iter()
        .map(|suggestion| (suggestion.stage_id, suggestion.suggested_status))
        .collect();
    assert_eq!(
        by_stage,
        vec![
            (100, LeadStatus::New),
            (200, LeadStatus::InProgress),
            (142, LeadStatus::Closed),
            (143, LeadStatus::Closed),
        ]
    );

    let outcome = state.mapper.apply_auto_mapping().await.unwrap();
    assert_eq!(outcome.updated, 4);
    assert_eq!(outcome.skipped, 0);
    assert!(state.mapper.suggest_mappings().await.unwrap().is_empty());
    assert_eq!(
        state.mapper.get_status_for_stage(142).await.unwrap(),
        Some(LeadStatus::Closed)
    );
}

#[tokio::test]
async fn unknown_stage_mapping_is_not_found() {
    let server = MockServer::start().await;
    let (state, _db) = test_state(test_config(&server.uri())).await.unwrap();

    let err = state
        .mapper
        .update_stage_mapping(999, Some(LeadStatus::New))
        .await
        .unwrap_err();
    assert!(matches!(err, crm_sync::error::CrmError::NotFound { .. }));
    assert_eq!(state.mapper.get_status_for_stage(999).await.unwrap(), None);
}

#[tokio::test]
async fn users_are_paged_until_no_next_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_links": {"next": {"href": "https://agency.amocrm.ru/api/v4/users?page=2"}},
            "_embedded": {"users": [
                {"id": 1, "name": "Anna", "email": "anna@example.com", "rights": {"is_admin": true, "role_id": null}},
                {"id": 2, "name": "Boris", "email": "boris@example.com", "rights": {"is_admin": false, "role_id": 7, "group_id": 0}}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_links": {},
            "_embedded": {"users": [
                {"id": 3, "name": "Chen", "rights": {"is_active": false}}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (state, db) = test_state(test_config(&server.uri())).await.unwrap();
    seed_credential(&db, "access-0", 3600).await.unwrap();

    let outcome = state
        .runner
        .run(Sweep::Users, Trigger::Manual, None)
        .await
        .unwrap();
    assert_eq!(outcome.synced, 3);
    assert_eq!(outcome.errors, 0);
}

#[tokio::test]
async fn roles_sync_fails_whole_sweep_without_credential() {
    let server = MockServer::start().await;
    let (state, _db) = test_state(test_config(&server.uri())).await.unwrap();

    let err = state
        .runner
        .run(Sweep::Roles, Trigger::Manual, None)
        .await
        .unwrap_err();
    assert!(matches!(err, crm_sync::error::CrmError::Unauthorized(_)));

    let runs = state.sync_runs.recent(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "failed");
    assert_eq!(runs[0].triggered_by, "manual");
}
