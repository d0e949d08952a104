//! # Lead Repository
//!
//! Leads belong to the surrounding application; the sync engine only needs to look
//! them up by id or CRM id and write whole records back. [`LeadStore`] is that
//! seam, [`LeadRepository`] the SeaORM implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, sea_query::OnConflict};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    lead::{self, Entity as Lead},
    property::{self, Entity as Property},
};

/// Lead persistence as exposed by the application.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<lead::Model>, sea_orm::DbErr>;

    async fn find_by_external_id(
        &self,
        crm_lead_id: i64,
    ) -> Result<Option<lead::Model>, sea_orm::DbErr>;

    /// Full-record upsert keyed by `id`; last write wins.
    async fn save(&self, lead: lead::Model) -> Result<lead::Model, sea_orm::DbErr>;

    /// Property the lead enquires about, if any.
    async fn property_for(
        &self,
        lead: &lead::Model,
    ) -> Result<Option<property::Model>, sea_orm::DbErr>;
}

#[derive(Debug, Clone)]
pub struct LeadRepository {
    db: Arc<DatabaseConnection>,
}

impl LeadRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LeadStore for LeadRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<lead::Model>, sea_orm::DbErr> {
        Lead::find_by_id(id).one(self.db.as_ref()).await
    }

    async fn find_by_external_id(
        &self,
        crm_lead_id: i64,
    ) -> Result<Option<lead::Model>, sea_orm::DbErr> {
        Lead::find()
            .filter(lead::Column::CrmLeadId.eq(crm_lead_id))
            .one(self.db.as_ref())
            .await
    }

    async fn save(&self, mut lead: lead::Model) -> Result<lead::Model, sea_orm::DbErr> {
        lead.updated_at = Utc::now().fixed_offset();
        let row = lead::ActiveModel {
            id: Set(lead.id),
            property_id: Set(lead.property_id),
            guest_name: Set(lead.guest_name.clone()),
            guest_phone: Set(lead.guest_phone.clone()),
            guest_email: Set(lead.guest_email.clone()),
            comment: Set(lead.comment.clone()),
            status: Set(lead.status),
            crm_lead_id: Set(lead.crm_lead_id),
            crm_contact_id: Set(lead.crm_contact_id),
            responsible_user_id: Set(lead.responsible_user_id),
            crm_lead_name: Set(lead.crm_lead_name.clone()),
            created_at: Set(lead.created_at),
            updated_at: Set(lead.updated_at),
        };

        Lead::insert(row)
            .on_conflict(
                OnConflict::column(lead::Column::Id)
                    .update_columns([
                        lead::Column::PropertyId,
                        lead::Column::GuestName,
                        lead::Column::GuestPhone,
                        lead::Column::GuestEmail,
                        lead::Column::Comment,
                        lead::Column::Status,
                        lead::Column::CrmLeadId,
                        lead::Column::CrmContactId,
                        lead::Column::ResponsibleUserId,
                        lead::Column::CrmLeadName,
                        lead::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(lead)
    }

    async fn property_for(
        &self,
        lead: &lead::Model,
    ) -> Result<Option<property::Model>, sea_orm::DbErr> {
        match lead.property_id {
            Some(property_id) => Property::find_by_id(property_id).one(self.db.as_ref()).await,
            None => Ok(None),
        }
    }
}

impl LeadRepository {
    /// Inserts a property row; the application owns properties, this exists for
    /// seeding and tests.
    pub async fn insert_property(
        &self,
        title: &str,
        price: Option<i64>,
    ) -> Result<property::Model, sea_orm::DbErr> {
        let model = property::Model {
            id: Uuid::new_v4(),
            title: title.to_string(),
            price,
            created_at: Utc::now().fixed_offset(),
        };
        let row = property::ActiveModel {
            id: Set(model.id),
            title: Set(model.title.clone()),
            price: Set(model.price),
            created_at: Set(model.created_at),
        };
        Property::insert(row)
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(model)
    }
}

/// A fresh lead as the application would create it from a website enquiry.
pub fn new_lead(
    guest_name: Option<&str>,
    guest_phone: Option<&str>,
    guest_email: Option<&str>,
    property_id: Option<Uuid>,
) -> lead::Model {
    let now = Utc::now().fixed_offset();
    lead::Model {
        id: Uuid::new_v4(),
        property_id,
        guest_name: guest_name.map(str::to_string),
        guest_phone: guest_phone.map(str::to_string),
        guest_email: guest_email.map(str::to_string),
        comment: None,
        status: lead::LeadStatus::New,
        crm_lead_id: None,
        crm_contact_id: None,
        responsible_user_id: None,
        crm_lead_name: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LeadStatus;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn repo() -> LeadRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        LeadRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn save_is_a_full_record_upsert() {
        let repo = repo().await;
        let mut lead = new_lead(Some("Jane"), Some("+971500000000"), None, None);
        repo.save(lead.clone()).await.unwrap();

        lead.status = LeadStatus::InProgress;
        lead.crm_lead_id = Some(501);
        repo.save(lead.clone()).await.unwrap();

        let stored = repo.find_by_external_id(501).await.unwrap().unwrap();
        assert_eq!(stored.id, lead.id);
        assert_eq!(stored.status, LeadStatus::InProgress);
        assert_eq!(stored.guest_phone.as_deref(), Some("+971500000000"));
    }

    #[tokio::test]
    async fn property_lookup_follows_property_id() {
        let repo = repo().await;
        let property = repo.insert_property("Marina Villa", Some(2_500_000)).await.unwrap();
        let lead = new_lead(Some("Jane"), None, None, Some(property.id));

        let found = repo.property_for(&lead).await.unwrap().unwrap();
        assert_eq!(found.title, "Marina Villa");
        assert!(
            repo.property_for(&new_lead(None, None, None, None))
                .await
                .unwrap()
                .is_none()
        );
    }
}
