//! # CRM Operator Handlers
//!
//! OAuth callback, credential status, manual sweep triggers, taxonomy reads,
//! stage mapping administration and lead export/push. Everything except the OAuth
//! callback sits behind operator bearer authentication.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::crm::ConnectionStatus;
use crate::error::{ApiError, CrmError, validation_error};
use crate::models::{LeadStatus, pipeline, stage, sync_run};
use crate::scheduler::{Sweep, Trigger};
use crate::server::AppState;
use crate::sync::reconciler::ExportOutcome;
use crate::sync::{AutoMappingOutcome, MappingSuggestion, SyncOutcome};

const DEFAULT_SYNC_RUNS_LIMIT: u64 = 50;
const MAX_SYNC_RUNS_LIMIT: u64 = 500;

/// Query parameters delivered by the CRM consent redirect
#[derive(Debug, Deserialize, IntoParams)]
pub struct OAuthCallbackQuery {
    /// One-time authorization code
    pub code: Option<String>,
    /// Account subdomain the consent was granted for
    pub referer: Option<String>,
    /// Opaque value echoed back by the CRM
    pub state: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OAuthCallbackResponse {
    pub status: String,
    pub account_id: i64,
}

/// Exchanges the authorization code for the account's token pair
#[utoipa::path(
    get,
    path = "/crm/oauth/callback",
    params(OAuthCallbackQuery),
    responses(
        (status = 200, description = "Credential stored", body = OAuthCallbackResponse),
        (status = 400, description = "Missing or rejected authorization code", body = ApiError),
        (status = 503, description = "CRM unreachable", body = ApiError)
    ),
    tag = "crm"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Json<OAuthCallbackResponse>, ApiError> {
    let code = query
        .code
        .as_deref()
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| {
            validation_error(
                "Missing authorization code",
                serde_json::json!({ "code": "required" }),
            )
        })?;

    if let Some(referer) = query.referer.as_deref() {
        tracing::info!(referer, "OAuth callback received");
    }

    match state.tokens.exchange_authorization_code(code).await {
        Ok(()) => Ok(Json(OAuthCallbackResponse {
            status: "connected".to_string(),
            account_id: state.tokens.account_id(),
        })),
        Err(CrmError::Upstream { status, body, .. }) => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "AUTHORIZATION_REJECTED".to_string(),
            format!("CRM rejected the authorization code with status {status}"),
        )
        .with_details(serde_json::json!({ "upstream_status": status, "body": body }))),
        Err(err) => Err(err.into()),
    }
}

/// Current credential state of the configured account
#[utoipa::path(
    get,
    path = "/crm/status",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Connection status", body = ConnectionStatus),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "crm"
)]
pub async fn connection_status(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<ConnectionStatus>, ApiError> {
    Ok(Json(state.tokens.connection_status().await?))
}

/// Externally obtained token pair
#[derive(Debug, Deserialize, ToSchema)]
pub struct StoreCredentialsRequest {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds; one day when omitted
    pub expires_in: Option<i64>,
}

/// Stores a token pair without the OAuth round trip
#[utoipa::path(
    put,
    path = "/crm/credentials",
    security(("bearer_auth" = [])),
    request_body = StoreCredentialsRequest,
    responses(
        (status = 200, description = "Credential stored", body = ConnectionStatus),
        (status = 400, description = "Invalid token pair", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "crm"
)]
pub async fn store_credentials(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Json(request): Json<StoreCredentialsRequest>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    state
        .tokens
        .store_tokens_manually(
            &request.access_token,
            &request.refresh_token,
            request.expires_in,
        )
        .await?;
    Ok(Json(state.tokens.connection_status().await?))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SyncQuery {
    /// Lead pull only: how many recently updated leads to fetch (1-250)
    pub limit: Option<u32>,
}

/// Runs one sweep now, waiting for an in-flight run of the same kind
#[utoipa::path(
    post,
    path = "/crm/sync/{kind}",
    security(("bearer_auth" = [])),
    params(
        ("kind" = Sweep, Path, description = "Sweep to run"),
        SyncQuery
    ),
    responses(
        (status = 200, description = "Sweep finished", body = SyncOutcome),
        (status = 401, description = "Unauthorized or CRM authorization required", body = ApiError),
        (status = 502, description = "CRM error", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(kind): Path<Sweep>,
    Query(query): Query<SyncQuery>,
) -> Result<Json<SyncOutcome>, ApiError> {
    let outcome = state.runner.run(kind, Trigger::Manual, query.limit).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PipelineWithStages {
    pub pipeline: pipeline::Model,
    pub stages: Vec<stage::Model>,
}

/// Mirrored pipelines with their stages
#[utoipa::path(
    get,
    path = "/crm/pipelines",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Pipelines", body = [PipelineWithStages]),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "taxonomy"
)]
pub async fn list_pipelines(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<Vec<PipelineWithStages>>, ApiError> {
    let pipelines = state.taxonomy.list_pipelines().await?;
    let mut stages = state.taxonomy.list_stages().await?;

    let result = pipelines
        .into_iter()
        .map(|pipeline| {
            let (own, rest): (Vec<_>, Vec<_>) = stages
                .drain(..)
                .partition(|stage| stage.pipeline_id == pipeline.id);
            stages = rest;
            PipelineWithStages {
                pipeline,
                stages: own,
            }
        })
        .collect();

    Ok(Json(result))
}

/// Stages of one mirrored pipeline
#[utoipa::path(
    get,
    path = "/crm/pipelines/{pipeline_id}/stages",
    security(("bearer_auth" = [])),
    params(("pipeline_id" = i64, Path, description = "CRM pipeline id")),
    responses(
        (status = 200, description = "Stages", body = [stage::Model]),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown pipeline", body = ApiError)
    ),
    tag = "taxonomy"
)]
pub async fn list_pipeline_stages(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(pipeline_id): Path<i64>,
) -> Result<Json<Vec<stage::Model>>, ApiError> {
    if state.taxonomy.find_pipeline(pipeline_id).await?.is_none() {
        return Err(CrmError::not_found("pipeline", pipeline_id).into());
    }
    Ok(Json(state.taxonomy.stages_for_pipeline(pipeline_id).await?))
}

/// Mapping suggestions for unmapped stages
#[utoipa::path(
    get,
    path = "/crm/stages/suggestions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Suggestions", body = [MappingSuggestion]),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "mapping"
)]
pub async fn suggest_stage_mappings(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<Vec<MappingSuggestion>>, ApiError> {
    Ok(Json(state.mapper.suggest_mappings().await?))
}

/// Applies every current suggestion
#[utoipa::path(
    post,
    path = "/crm/stages/auto-map",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Auto-mapping result", body = AutoMappingOutcome),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "mapping"
)]
pub async fn apply_auto_mapping(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<AutoMappingOutcome>, ApiError> {
    Ok(Json(state.mapper.apply_auto_mapping().await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StageMappingRequest {
    /// Internal status; `null` clears the mapping
    pub status: Option<LeadStatus>,
}

/// Sets or clears the internal status of one stage
#[utoipa::path(
    put,
    path = "/crm/stages/{stage_id}/mapping",
    security(("bearer_auth" = [])),
    params(("stage_id" = i64, Path, description = "CRM stage id")),
    request_body = StageMappingRequest,
    responses(
        (status = 200, description = "Updated stage", body = stage::Model),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown stage", body = ApiError)
    ),
    tag = "mapping"
)]
pub async fn update_stage_mapping(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(stage_id): Path<i64>,
    Json(request): Json<StageMappingRequest>,
) -> Result<Json<stage::Model>, ApiError> {
    let stage = state
        .mapper
        .update_stage_mapping(stage_id, request.status)
        .await?;
    Ok(Json(stage))
}

/// Exports a freshly created lead: contact, deal and follow-up task
#[utoipa::path(
    post,
    path = "/crm/leads/{lead_id}/export",
    security(("bearer_auth" = [])),
    params(("lead_id" = String, Path, description = "Internal lead UUID")),
    responses(
        (status = 200, description = "Lead exported or already exported", body = ExportOutcome),
        (status = 401, description = "Unauthorized or CRM authorization required", body = ApiError),
        (status = 404, description = "Unknown lead", body = ApiError),
        (status = 502, description = "CRM error", body = ApiError)
    ),
    tag = "leads"
)]
pub async fn export_lead(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(lead_id): Path<Uuid>,
) -> Result<Json<ExportOutcome>, ApiError> {
    Ok(Json(state.reconciler.export_new_lead(lead_id).await?))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

/// Pushes local changes of an exported lead upstream
#[utoipa::path(
    post,
    path = "/crm/leads/{lead_id}/push",
    security(("bearer_auth" = [])),
    params(("lead_id" = String, Path, description = "Internal lead UUID")),
    responses(
        (status = 200, description = "Lead pushed", body = StatusResponse),
        (status = 400, description = "Lead was never exported", body = ApiError),
        (status = 401, description = "Unauthorized or CRM authorization required", body = ApiError),
        (status = 404, description = "Unknown lead", body = ApiError)
    ),
    tag = "leads"
)]
pub async fn push_lead(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(lead_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.reconciler.push_lead(lead_id).await?;
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SyncRunsQuery {
    /// Maximum number of runs to return (default: 50, max: 500)
    pub limit: Option<u64>,
}

/// Most recent sweep runs, newest first
#[utoipa::path(
    get,
    path = "/crm/sync-runs",
    security(("bearer_auth" = [])),
    params(SyncRunsQuery),
    responses(
        (status = 200, description = "Sync runs", body = [sync_run::Model]),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn list_sync_runs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(query): Query<SyncRunsQuery>,
) -> Result<Json<Vec<sync_run::Model>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SYNC_RUNS_LIMIT)
        .clamp(1, MAX_SYNC_RUNS_LIMIT);
    Ok(Json(state.sync_runs.recent(limit).await?))
}
