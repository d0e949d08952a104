//! # Sync Run Repository
//!
//! Append-only log of taxonomy and lead sweeps.

use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder, QuerySelect, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::sync_run::{self, Entity as SyncRun};

/// What a finished sweep reports back for logging.
#[derive(Debug, Clone)]
pub struct NewSyncRun<'a> {
    pub kind: &'a str,
    pub triggered_by: &'a str,
    pub synced: u32,
    pub errors: u32,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

impl NewSyncRun<'_> {
    /// `failed` when the sweep could not run at all, `partial` when some items
    /// failed, `success` otherwise.
    pub fn status(&self) -> &'static str {
        if self.error_message.is_some() {
            "failed"
        } else if self.errors > 0 {
            "partial"
        } else {
            "success"
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncRunRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncRunRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn record(&self, run: NewSyncRun<'_>) -> Result<sync_run::Model, sea_orm::DbErr> {
        let model = sync_run::Model {
            id: Uuid::new_v4(),
            kind: run.kind.to_string(),
            triggered_by: run.triggered_by.to_string(),
            status: run.status().to_string(),
            synced: i32::try_from(run.synced).unwrap_or(i32::MAX),
            errors: i32::try_from(run.errors).unwrap_or(i32::MAX),
            duration_ms: run.duration_ms,
            error_message: run.error_message,
            created_at: Utc::now().fixed_offset(),
        };

        let row = sync_run::ActiveModel {
            id: Set(model.id),
            kind: Set(model.kind.clone()),
            triggered_by: Set(model.triggered_by.clone()),
            status: Set(model.status.clone()),
            synced: Set(model.synced),
            errors: Set(model.errors),
            duration_ms: Set(model.duration_ms),
            error_message: Set(model.error_message.clone()),
            created_at: Set(model.created_at),
        };
        SyncRun::insert(row)
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(model)
    }

    /// Most recent runs first.
    pub async fn recent(&self, limit: u64) -> Result<Vec<sync_run::Model>, sea_orm::DbErr> {
        SyncRun::find()
            .order_by_desc(sync_run::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(errors: u32, error_message: Option<&str>) -> NewSyncRun<'static> {
        NewSyncRun {
            kind: "pipelines",
            triggered_by: "manual",
            synced: 3,
            errors,
            duration_ms: 12,
            error_message: error_message.map(str::to_string),
        }
    }

    #[test]
    fn status_reflects_outcome() {
        assert_eq!(run(0, None).status(), "success");
        assert_eq!(run(1, None).status(), "partial");
        assert_eq!(run(0, Some("CRM authorization required")).status(), "failed");
    }
}
