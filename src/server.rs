//! # Server Configuration
//!
//! Application state wiring, the axum router and the OpenAPI document.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crm::{CrmClient, TokenManager, build_http_client};
use crate::crypto::CryptoKey;
use crate::error::CrmError;
use crate::handlers;
use crate::repositories::{
    ContactRepository, CredentialRepository, LeadRepository, LeadStore, SyncRunRepository,
    TaskRepository, TaxonomyRepository,
};
use crate::scheduler::{CrmScheduler, SweepRunner};
use crate::sync::{Reconciler, StageMapper, TaxonomySync, WebhookRouter};
use crate::telemetry::trace_id_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub tokens: Arc<TokenManager>,
    pub taxonomy: TaxonomyRepository,
    pub mapper: StageMapper,
    pub reconciler: Reconciler,
    pub webhooks: WebhookRouter,
    pub runner: SweepRunner,
    pub sync_runs: SyncRunRepository,
}

impl AppState {
    /// Wires repositories, the token manager, the CRM gateway and the sync
    /// components on top of one database pool.
    pub fn new(config: AppConfig, db: DatabaseConnection) -> Result<Self, CrmError> {
        let lead_store: Arc<dyn LeadStore> = Arc::new(LeadRepository::new(Arc::new(db.clone())));
        Self::with_lead_store(config, db, lead_store)
    }

    /// Same as [`AppState::new`] with an application-provided lead store.
    pub fn with_lead_store(
        config: AppConfig,
        db: DatabaseConnection,
        leads: Arc<dyn LeadStore>,
    ) -> Result<Self, CrmError> {
        let key_bytes = config
            .crypto_key
            .clone()
            .ok_or_else(|| CrmError::Validation("crypto key is not configured".to_string()))?;
        let crypto_key = CryptoKey::new(key_bytes)?;
        let shared_db = Arc::new(db.clone());

        let http = build_http_client(&config.crm)?;
        let tokens = Arc::new(TokenManager::new(
            CredentialRepository::new(shared_db.clone(), crypto_key),
            http.clone(),
            config.crm.clone(),
        ));
        let client = CrmClient::new(http, tokens.clone(), &config.crm.base_url())?;

        let taxonomy = TaxonomyRepository::new(shared_db.clone());
        let mapper = StageMapper::new(taxonomy.clone());
        let reconciler = Reconciler::new(
            client.clone(),
            leads,
            mapper.clone(),
            ContactRepository::new(shared_db.clone()),
            TaskRepository::new(shared_db.clone()),
            config.sync.follow_up_task_seconds,
            config.sync.concurrency,
        );
        let taxonomy_sync = TaxonomySync::new(client, taxonomy.clone(), config.sync.concurrency);
        let sync_runs = SyncRunRepository::new(shared_db);
        let runner = SweepRunner::new(
            taxonomy_sync,
            reconciler.clone(),
            sync_runs.clone(),
            config.sync.lead_pull_limit,
        );
        let webhooks = WebhookRouter::new(reconciler.clone(), config.crm.account_id);

        Ok(Self {
            config: Arc::new(config),
            db,
            tokens,
            taxonomy,
            mapper,
            reconciler,
            webhooks,
            runner,
            sync_runs,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route("/crm/status", get(handlers::crm::connection_status))
        .route("/crm/credentials", put(handlers::crm::store_credentials))
        .route("/crm/sync/{kind}", post(handlers::crm::trigger_sync))
        .route("/crm/pipelines", get(handlers::crm::list_pipelines))
        .route(
            "/crm/pipelines/{pipeline_id}/stages",
            get(handlers::crm::list_pipeline_stages),
        )
        .route(
            "/crm/stages/suggestions",
            get(handlers::crm::suggest_stage_mappings),
        )
        .route("/crm/stages/auto-map", post(handlers::crm::apply_auto_mapping))
        .route(
            "/crm/stages/{stage_id}/mapping",
            put(handlers::crm::update_stage_mapping),
        )
        .route("/crm/leads/{lead_id}/export", post(handlers::crm::export_lead))
        .route("/crm/leads/{lead_id}/push", post(handlers::crm::push_lead))
        .route("/crm/sync-runs", get(handlers::crm::list_sync_runs))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/crm/oauth/callback", get(handlers::crm::oauth_callback))
        .route("/crm/webhook", post(handlers::webhooks::receive_webhook))
        .merge(operator_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serves the API (and the scheduler when enabled) until `shutdown` fires.
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let scheduler_config = config.scheduler.clone();
    let state = AppState::new(config, db)?;

    let scheduler_task = if scheduler_config.enabled {
        let scheduler = CrmScheduler::new(state.runner.clone(), scheduler_config);
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    } else {
        tracing::info!("scheduler disabled");
        None
    };

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    shutdown.cancel();
    if let Some(task) = scheduler_task {
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "scheduler task ended abnormally");
        }
    }
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::crm::oauth_callback,
        crate::handlers::crm::connection_status,
        crate::handlers::crm::store_credentials,
        crate::handlers::crm::trigger_sync,
        crate::handlers::crm::list_pipelines,
        crate::handlers::crm::list_pipeline_stages,
        crate::handlers::crm::suggest_stage_mappings,
        crate::handlers::crm::apply_auto_mapping,
        crate::handlers::crm::update_stage_mapping,
        crate::handlers::crm::export_lead,
        crate::handlers::crm::push_lead,
        crate::handlers::crm::list_sync_runs,
        crate::handlers::webhooks::receive_webhook,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::LeadStatus,
            crate::models::pipeline::Model,
            crate::models::stage::Model,
            crate::models::sync_run::Model,
            crate::error::ApiError,
            crate::crm::ConnectionStatus,
            crate::sync::SyncOutcome,
            crate::sync::MappingSuggestion,
            crate::sync::AutoMappingOutcome,
            crate::sync::reconciler::ExportOutcome,
            crate::scheduler::Sweep,
            crate::handlers::HealthResponse,
            crate::handlers::crm::OAuthCallbackResponse,
            crate::handlers::crm::StoreCredentialsRequest,
            crate::handlers::crm::StageMappingRequest,
            crate::handlers::crm::PipelineWithStages,
            crate::handlers::crm::StatusResponse,
            crate::handlers::webhooks::WebhookAck,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "CRM Sync API",
        description = "OAuth credential lifecycle, taxonomy mirror, stage mapping and lead reconciliation against the CRM",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
