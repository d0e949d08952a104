//! # Taxonomy Repository
//!
//! Upserts for the mirrored pipeline/stage/role/user graph. Every write is a single
//! `INSERT ... ON CONFLICT (id) DO UPDATE` so concurrent sweeps cannot interleave a
//! read-modify-write.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
    sea_query::{Condition, OnConflict},
};
use std::sync::Arc;

use crate::crm::types::{CrmPipeline, CrmRole, CrmStage, CrmUser};
use crate::models::{
    LeadStatus, crm_role, crm_user,
    pipeline::{self, Entity as Pipeline},
    stage::{self, Entity as Stage, SYSTEM_STAGE_IDS},
};

/// Stages of `pipeline_id` plus the system stages every pipeline shares.
fn in_pipeline(pipeline_id: i64) -> Condition {
    Condition::any()
        .add(stage::Column::PipelineId.eq(pipeline_id))
        .add(stage::Column::Id.is_in(SYSTEM_STAGE_IDS))
}

#[derive(Debug, Clone)]
pub struct TaxonomyRepository {
    db: Arc<DatabaseConnection>,
}

impl TaxonomyRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn upsert_pipeline(&self, source: &CrmPipeline) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now().fixed_offset();
        let row = pipeline::ActiveModel {
            id: Set(source.id),
            name: Set(source.name.clone()),
            sort: Set(source.sort),
            is_main: Set(source.is_main),
            is_unsorted_on: Set(source.is_unsorted_on),
            account_id: Set(source.account_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Pipeline::insert(row)
            .on_conflict(
                OnConflict::column(pipeline::Column::Id)
                    .update_columns([
                        pipeline::Column::Name,
                        pipeline::Column::Sort,
                        pipeline::Column::IsMain,
                        pipeline::Column::IsUnsortedOn,
                        pipeline::Column::AccountId,
                        pipeline::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Upserts one stage. `mapped_status` is never part of the update set, so an
    /// administrator's mapping survives any number of refreshes.
    pub async fn upsert_stage(
        &self,
        pipeline_id: i64,
        source: &CrmStage,
    ) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now().fixed_offset();
        let row = stage::ActiveModel {
            id: Set(source.id),
            pipeline_id: Set(source.pipeline_id.unwrap_or(pipeline_id)),
            name: Set(source.name.clone()),
            sort: Set(source.sort),
            is_editable: Set(source.is_editable),
            color: Set(source.color.clone()),
            mapped_status: NotSet,
            created_at: Set(now),
            updated_at: Set(now),
        };

        Stage::insert(row)
            .on_conflict(
                OnConflict::column(stage::Column::Id)
                    .update_columns([
                        stage::Column::PipelineId,
                        stage::Column::Name,
                        stage::Column::Sort,
                        stage::Column::IsEditable,
                        stage::Column::Color,
                        stage::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn upsert_role(
        &self,
        source: &CrmRole,
        account_id: Option<i64>,
    ) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now().fixed_offset();
        let row = crm_role::ActiveModel {
            id: Set(source.id),
            name: Set(source.name.clone()),
            rights: Set(source.rights.clone()),
            account_id: Set(account_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        crm_role::Entity::insert(row)
            .on_conflict(
                OnConflict::column(crm_role::Column::Id)
                    .update_columns([
                        crm_role::Column::Name,
                        crm_role::Column::Rights,
                        crm_role::Column::AccountId,
                        crm_role::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn upsert_user(
        &self,
        source: &CrmUser,
        account_id: Option<i64>,
    ) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now().fixed_offset();
        let row = crm_user::ActiveModel {
            id: Set(source.id),
            name: Set(source.name.clone()),
            email: Set(source.email.clone()),
            lang: Set(source.lang.clone()),
            is_admin: Set(source.rights.is_admin),
            is_free: Set(source.rights.is_free),
            is_active: Set(source.rights.is_active),
            role_id: Set(source.rights.role_id),
            group_id: Set(source.rights.group_id),
            account_id: Set(account_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        crm_user::Entity::insert(row)
            .on_conflict(
                OnConflict::column(crm_user::Column::Id)
                    .update_columns([
                        crm_user::Column::Name,
                        crm_user::Column::Email,
                        crm_user::Column::Lang,
                        crm_user::Column::IsAdmin,
                        crm_user::Column::IsFree,
                        crm_user::Column::IsActive,
                        crm_user::Column::RoleId,
                        crm_user::Column::GroupId,
                        crm_user::Column::AccountId,
                        crm_user::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn list_pipelines(&self) -> Result<Vec<pipeline::Model>, sea_orm::DbErr> {
        Pipeline::find()
            .order_by_asc(pipeline::Column::Sort)
            .order_by_asc(pipeline::Column::Id)
            .all(self.db.as_ref())
            .await
    }

    pub async fn find_pipeline(&self, id: i64) -> Result<Option<pipeline::Model>, sea_orm::DbErr> {
        Pipeline::find_by_id(id).one(self.db.as_ref()).await
    }

    /// All stages ordered by pipeline, then display order, then id.
    pub async fn list_stages(&self) -> Result<Vec<stage::Model>, sea_orm::DbErr> {
        Stage::find()
            .order_by_asc(stage::Column::PipelineId)
            .order_by_asc(stage::Column::Sort)
            .order_by_asc(stage::Column::Id)
            .all(self.db.as_ref())
            .await
    }

    pub async fn stages_for_pipeline(
        &self,
        pipeline_id: i64,
    ) -> Result<Vec<stage::Model>, sea_orm::DbErr> {
        Stage::find()
            .filter(in_pipeline(pipeline_id))
            .order_by_asc(stage::Column::Sort)
            .order_by_asc(stage::Column::Id)
            .all(self.db.as_ref())
            .await
    }

    /// Stages without an administrator mapping, in the same order as [`Self::list_stages`].
    pub async fn unmapped_stages(&self) -> Result<Vec<stage::Model>, sea_orm::DbErr> {
        Stage::find()
            .filter(stage::Column::MappedStatus.is_null())
            .order_by_asc(stage::Column::PipelineId)
            .order_by_asc(stage::Column::Sort)
            .order_by_asc(stage::Column::Id)
            .all(self.db.as_ref())
            .await
    }

    /// First stage (by display order) of `pipeline_id` mapped to `status`. The
    /// shared system stages count as part of every pipeline.
    pub async fn stage_for_status(
        &self,
        pipeline_id: i64,
        status: LeadStatus,
    ) -> Result<Option<stage::Model>, sea_orm::DbErr> {
        Stage::find()
            .filter(in_pipeline(pipeline_id))
            .filter(stage::Column::MappedStatus.eq(status))
            .order_by_asc(stage::Column::Sort)
            .order_by_asc(stage::Column::Id)
            .one(self.db.as_ref())
            .await
    }

    pub async fn find_stage(&self, id: i64) -> Result<Option<stage::Model>, sea_orm::DbErr> {
        Stage::find_by_id(id).one(self.db.as_ref()).await
    }

    /// Sets (or clears) the mapping of an existing stage. Returns `None` when the
    /// stage is unknown.
    pub async fn set_stage_mapping(
        &self,
        id: i64,
        status: Option<LeadStatus>,
    ) -> Result<Option<stage::Model>, sea_orm::DbErr> {
        let Some(existing) = self.find_stage(id).await? else {
            return Ok(None);
        };

        let mut active: stage::ActiveModel = existing.into();
        active.mapped_status = Set(status);
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(self.db.as_ref()).await.map(Some)
    }

    pub async fn count_pipelines(&self) -> Result<u64, sea_orm::DbErr> {
        Pipeline::find().count(self.db.as_ref()).await
    }

    pub async fn count_stages(&self) -> Result<u64, sea_orm::DbErr> {
        Stage::find().count(self.db.as_ref()).await
    }
}
