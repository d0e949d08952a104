//! Creates the mirrored CRM taxonomy: pipelines, their stages, roles and users.
//!
//! Primary keys are the ids assigned by the CRM, never generated locally.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CrmPipelines::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrmPipelines::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CrmPipelines::Name).text().not_null())
                    .col(
                        ColumnDef::new(CrmPipelines::Sort)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CrmPipelines::IsMain)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(CrmPipelines::IsUnsortedOn)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(CrmPipelines::AccountId).big_integer().null())
                    .col(
                        ColumnDef::new(CrmPipelines::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CrmPipelines::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CrmStages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrmStages::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CrmStages::PipelineId).big_integer().not_null())
                    .col(ColumnDef::new(CrmStages::Name).text().not_null())
                    .col(
                        ColumnDef::new(CrmStages::Sort)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CrmStages::IsEditable)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(CrmStages::Color).text().null())
                    .col(ColumnDef::new(CrmStages::MappedStatus).string_len(16).null())
                    .col(
                        ColumnDef::new(CrmStages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CrmStages::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_crm_stages_pipeline_id")
                            .from(CrmStages::Table, CrmStages::PipelineId)
                            .to(CrmPipelines::Table, CrmPipelines::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_crm_stages_pipeline_id")
                    .table(CrmStages::Table)
                    .col(CrmStages::PipelineId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CrmRoles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrmRoles::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CrmRoles::Name).text().not_null())
                    .col(ColumnDef::new(CrmRoles::Rights).json_binary().null())
                    .col(ColumnDef::new(CrmRoles::AccountId).big_integer().null())
                    .col(
                        ColumnDef::new(CrmRoles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CrmRoles::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CrmUsers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrmUsers::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CrmUsers::Name).text().not_null())
                    .col(ColumnDef::new(CrmUsers::Email).text().null())
                    .col(ColumnDef::new(CrmUsers::Lang).text().null())
                    .col(
                        ColumnDef::new(CrmUsers::IsAdmin)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(CrmUsers::IsFree)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(CrmUsers::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(CrmUsers::RoleId).big_integer().null())
                    .col(ColumnDef::new(CrmUsers::GroupId).big_integer().null())
                    .col(ColumnDef::new(CrmUsers::AccountId).big_integer().null())
                    .col(
                        ColumnDef::new(CrmUsers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CrmUsers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CrmUsers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CrmRoles::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_crm_stages_pipeline_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CrmStages::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CrmPipelines::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CrmPipelines {
    Table,
    Id,
    Name,
    Sort,
    IsMain,
    IsUnsortedOn,
    AccountId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CrmStages {
    Table,
    Id,
    PipelineId,
    Name,
    Sort,
    IsEditable,
    Color,
    MappedStatus,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CrmRoles {
    Table,
    Id,
    Name,
    Rights,
    AccountId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CrmUsers {
    Table,
    Id,
    Name,
    Email,
    Lang,
    IsAdmin,
    IsFree,
    IsActive,
    RoleId,
    GroupId,
    AccountId,
    CreatedAt,
    UpdatedAt,
}
