//! Taxonomy mirror: pipelines with their stages, roles and users.
//!
//! Records are upserted by CRM id and never pruned locally. A stage that vanished
//! upstream simply stops receiving updates.

use tracing::{info, instrument, warn};

use crate::crm::CrmClient;
use crate::error::CrmError;
use crate::repositories::TaxonomyRepository;
use crate::sync::{SyncOutcome, fan_out};

#[derive(Clone)]
pub struct TaxonomySync {
    client: CrmClient,
    repo: TaxonomyRepository,
    concurrency: usize,
}

impl TaxonomySync {
    pub fn new(client: CrmClient, repo: TaxonomyRepository, concurrency: usize) -> Self {
        Self {
            client,
            repo,
            concurrency,
        }
    }

    /// Upserts every pipeline and its embedded stages. A pipeline counts as one
    /// error if it or any of its stages fails to persist.
    #[instrument(skip_all)]
    pub async fn sync_pipelines(&self) -> Result<SyncOutcome, CrmError> {
        let pipelines = self.client.list_pipelines().await?;
        let repo = self.repo.clone();

        let outcome = fan_out("pipelines", pipelines, self.concurrency, move |pipeline| {
            let repo = repo.clone();
            async move {
                repo.upsert_pipeline(&pipeline).await.map_err(CrmError::from)?;

                let mut first_error = None;
                for stage in &pipeline.embedded.statuses {
                    if let Err(err) = repo.upsert_stage(pipeline.id, stage).await {
                        warn!(pipeline_id = pipeline.id, stage_id = stage.id, error = %err, "stage upsert failed");
                        first_error.get_or_insert(err);
                    }
                }
                match first_error {
                    Some(err) => Err(CrmError::from(err)),
                    None => Ok(()),
                }
            }
        })
        .await;

        info!(synced = outcome.synced, errors = outcome.errors, "pipelines synced");
        Ok(outcome)
    }

    #[instrument(skip_all)]
    pub async fn sync_roles(&self) -> Result<SyncOutcome, CrmError> {
        let roles = self.client.list_roles().await?;
        let repo = self.repo.clone();
        let account_id = Some(self.client.tokens().account_id());

        let outcome = fan_out("roles", roles, self.concurrency, move |role| {
            let repo = repo.clone();
            async move {
                repo.upsert_role(&role, account_id).await?;
                Ok::<(), CrmError>(())
            }
        })
        .await;

        info!(synced = outcome.synced, errors = outcome.errors, "roles synced");
        Ok(outcome)
    }

    #[instrument(skip_all)]
    pub async fn sync_users(&self) -> Result<SyncOutcome, CrmError> {
        let users = self.client.list_users().await?;
        let repo = self.repo.clone();
        let account_id = Some(self.client.tokens().account_id());

        let outcome = fan_out("users", users, self.concurrency, move |user| {
            let repo = repo.clone();
            async move {
                repo.upsert_user(&user, account_id).await?;
                Ok::<(), CrmError>(())
            }
        })
        .await;

        info!(synced = outcome.synced, errors = outcome.errors, "users synced");
        Ok(outcome)
    }
}
