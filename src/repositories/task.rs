//! # Task Repository
//!
//! One-way mirror of CRM tasks. Rows are deleted only when the CRM reports the
//! task as deleted.

use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};
use std::sync::Arc;

use crate::crm::types::CrmTask;
use crate::models::task::{self, Entity as Task, TASK_TYPE_CALL};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: i64,
    pub text: String,
    pub task_type_id: i64,
    pub complete_till: i64,
    pub is_completed: bool,
    pub responsible_user_id: Option<i64>,
    pub entity_id: Option<i64>,
    pub entity_type: Option<String>,
    pub duration: Option<i64>,
    pub result_text: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub account_id: Option<i64>,
    pub crm_created_at: Option<i64>,
    pub crm_updated_at: Option<i64>,
}

impl From<&CrmTask> for TaskRecord {
    fn from(source: &CrmTask) -> Self {
        Self {
            id: source.id,
            text: source.text.clone(),
            task_type_id: source.task_type_id.unwrap_or(TASK_TYPE_CALL),
            complete_till: source.complete_till,
            is_completed: source.is_completed,
            responsible_user_id: source.responsible_user_id,
            entity_id: source.entity_id,
            entity_type: source.entity_type.clone(),
            duration: source.duration,
            result_text: source.result.as_ref().and_then(|result| result.text.clone()),
            created_by: source.created_by,
            updated_by: source.updated_by,
            account_id: source.account_id,
            crm_created_at: source.created_at,
            crm_updated_at: source.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRepository {
    db: Arc<DatabaseConnection>,
}

impl TaskRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn upsert(&self, record: TaskRecord) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now().fixed_offset();
        let row = task::ActiveModel {
            id: Set(record.id),
            text: Set(record.text),
            task_type_id: Set(record.task_type_id),
            complete_till: Set(record.complete_till),
            is_completed: Set(record.is_completed),
            responsible_user_id: Set(record.responsible_user_id),
            entity_id: Set(record.entity_id),
            entity_type: Set(record.entity_type),
            duration: Set(record.duration),
            result_text: Set(record.result_text),
            created_by: Set(record.created_by),
            updated_by: Set(record.updated_by),
            account_id: Set(record.account_id),
            crm_created_at: Set(record.crm_created_at),
            crm_updated_at: Set(record.crm_updated_at),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Task::insert(row)
            .on_conflict(
                OnConflict::column(task::Column::Id)
                    .update_columns([
                        task::Column::Text,
                        task::Column::TaskTypeId,
                        task::Column::CompleteTill,
                        task::Column::IsCompleted,
                        task::Column::ResponsibleUserId,
                        task::Column::EntityId,
                        task::Column::EntityType,
                        task::Column::Duration,
                        task::Column::ResultText,
                        task::Column::CreatedBy,
                        task::Column::UpdatedBy,
                        task::Column::AccountId,
                        task::Column::CrmCreatedAt,
                        task::Column::CrmUpdatedAt,
                        task::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn find(&self, id: i64) -> Result<Option<task::Model>, sea_orm::DbErr> {
        Task::find_by_id(id).one(self.db.as_ref()).await
    }

    /// Removes the mirror row; deleting an unknown id is not an error.
    pub async fn delete(&self, id: i64) -> Result<bool, sea_orm::DbErr> {
        let result = Task::delete_by_id(id).exec(self.db.as_ref()).await?;
        Ok(result.rows_affected > 0)
    }
}
