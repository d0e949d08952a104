//! Sync run log entity.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "crm_sync_runs")]
#[schema(as = SyncRun)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Sweep kind: `pipelines`, `roles`, `users`, `leads`
    pub kind: String,

    /// `scheduler` or `manual`
    pub triggered_by: String,

    /// `success`, `partial` or `failed`
    pub status: String,

    pub synced: i32,

    pub errors: i32,

    pub duration_ms: i64,

    /// Set when the whole sweep failed
    pub error_message: Option<String>,

    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
