//! Pipeline entity mirrored from the CRM.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "crm_pipelines")]
#[schema(as = Pipeline)]
pub struct Model {
    /// CRM-assigned pipeline id (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub name: String,

    /// Display order within the account
    pub sort: i32,

    /// Whether this is the account's main pipeline
    pub is_main: bool,

    /// Whether the "unsorted" inbox is enabled for this pipeline
    pub is_unsorted_on: bool,

    pub account_id: Option<i64>,

    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTimeWithTimeZone,

    #[schema(value_type = String, format = DateTime)]
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stage::Entity")]
    Stage,
}

impl Related<super::stage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Stage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
