//! # Contact Repository
//!
//! Local mirror of CRM contacts, keyed by the CRM contact id.

use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};
use std::sync::Arc;

use crate::crm::types::CrmContact;
use crate::models::contact::{self, Entity as Contact};

/// Column values of one mirrored contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactRecord {
    pub id: i64,
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub responsible_user_id: Option<i64>,
    pub account_id: Option<i64>,
    pub crm_created_at: Option<i64>,
    pub crm_updated_at: Option<i64>,
}

impl From<&CrmContact> for ContactRecord {
    fn from(source: &CrmContact) -> Self {
        Self {
            id: source.id,
            name: source.name.clone(),
            first_name: source.first_name.clone(),
            last_name: source.last_name.clone(),
            email: source.email(),
            phone: source.phone(),
            responsible_user_id: source.responsible_user_id,
            account_id: source.account_id,
            crm_created_at: source.created_at,
            crm_updated_at: source.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContactRepository {
    db: Arc<DatabaseConnection>,
}

impl ContactRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn upsert(&self, record: ContactRecord) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now().fixed_offset();
        let row = contact::ActiveModel {
            id: Set(record.id),
            name: Set(record.name),
            first_name: Set(record.first_name),
            last_name: Set(record.last_name),
            email: Set(record.email),
            phone: Set(record.phone),
            responsible_user_id: Set(record.responsible_user_id),
            account_id: Set(record.account_id),
            crm_created_at: Set(record.crm_created_at),
            crm_updated_at: Set(record.crm_updated_at),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Contact::insert(row)
            .on_conflict(
                OnConflict::column(contact::Column::Id)
                    .update_columns([
                        contact::Column::Name,
                        contact::Column::FirstName,
                        contact::Column::LastName,
                        contact::Column::Email,
                        contact::Column::Phone,
                        contact::Column::ResponsibleUserId,
                        contact::Column::AccountId,
                        contact::Column::CrmCreatedAt,
                        contact::Column::CrmUpdatedAt,
                        contact::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn find(&self, id: i64) -> Result<Option<contact::Model>, sea_orm::DbErr> {
        Contact::find_by_id(id).one(self.db.as_ref()).await
    }
}
