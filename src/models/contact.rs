//! Contact entity: local mirror of a CRM contact.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "crm_contacts")]
pub struct Model {
    /// CRM-assigned contact id (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub name: String,

    pub first_name: Option<String>,

    pub last_name: Option<String>,

    pub email: Option<String>,

    pub phone: Option<String>,

    pub responsible_user_id: Option<i64>,

    pub account_id: Option<i64>,

    /// Upstream creation time, epoch seconds
    pub crm_created_at: Option<i64>,

    /// Upstream modification time, epoch seconds
    pub crm_updated_at: Option<i64>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
