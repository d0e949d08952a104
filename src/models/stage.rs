//! Stage entity mirrored from the CRM.
//!
//! Every column except `mapped_status` follows upstream. `mapped_status` records an
//! administrator decision and is never written by a taxonomy sync.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;
use utoipa::ToSchema;

use super::lead::LeadStatus;

/// Stage id the CRM uses for "closed - won" in every pipeline.
pub const WON_STAGE_ID: i64 = 142;
/// Stage id the CRM uses for "closed - lost" in every pipeline.
pub const LOST_STAGE_ID: i64 = 143;
/// System stages share their id across pipelines, so the mirrored row belongs to
/// whichever pipeline was synced last. Lookups scoped to a pipeline include them.
pub const SYSTEM_STAGE_IDS: [i64; 2] = [WON_STAGE_ID, LOST_STAGE_ID];

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "crm_stages")]
#[schema(as = Stage)]
pub struct Model {
    /// CRM-assigned stage (status) id (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    /// Owning pipeline
    pub pipeline_id: i64,

    pub name: String,

    pub sort: i32,

    pub is_editable: bool,

    /// Hex color as shown in the CRM
    pub color: Option<String>,

    /// Internal lead status this stage maps to; locally owned
    pub mapped_status: Option<LeadStatus>,

    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTimeWithTimeZone,

    #[schema(value_type = String, format = DateTime)]
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pipeline::Entity",
        from = "Column::PipelineId",
        to = "super::pipeline::Column::Id"
    )]
    Pipeline,
}

impl Related<super::pipeline::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pipeline.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
