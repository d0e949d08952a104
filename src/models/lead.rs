//! Lead entity (application-owned) and the internal lead status enum.
//!
//! The sync engine writes only `status`, `crm_lead_id`, `crm_contact_id`,
//! `responsible_user_id` and `crm_lead_name`; all other columns belong to the
//! surrounding application.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "leads")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub property_id: Option<Uuid>,

    pub guest_name: Option<String>,

    pub guest_phone: Option<String>,

    pub guest_email: Option<String>,

    /// Free-form note entered by the client or an agent
    pub comment: Option<String>,

    pub status: LeadStatus,

    /// Reconciliation key; immutable once set
    pub crm_lead_id: Option<i64>,

    pub crm_contact_id: Option<i64>,

    pub responsible_user_id: Option<i64>,

    /// Lead name as last seen upstream
    pub crm_lead_name: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum LeadStatus {
    #[sea_orm(string_value = "NEW")]
    #[serde(rename = "NEW")]
    #[default]
    New,

    #[sea_orm(string_value = "IN_PROGRESS")]
    #[serde(rename = "IN_PROGRESS")]
    InProgress,

    #[sea_orm(string_value = "CLOSED")]
    #[serde(rename = "CLOSED")]
    Closed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "NEW",
            LeadStatus::InProgress => "IN_PROGRESS",
            LeadStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::property::Entity",
        from = "Column::PropertyId",
        to = "super::property::Column::Id"
    )]
    Property,
}

impl Related<super::property::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Property.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
