//! Creates the crm_sync_runs log: one row per scheduled or manual sweep.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CrmSyncRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrmSyncRuns::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CrmSyncRuns::Kind).text().not_null())
                    .col(ColumnDef::new(CrmSyncRuns::TriggeredBy).text().not_null())
                    .col(ColumnDef::new(CrmSyncRuns::Status).text().not_null())
                    .col(
                        ColumnDef::new(CrmSyncRuns::Synced)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CrmSyncRuns::Errors)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(CrmSyncRuns::DurationMs).big_integer().not_null())
                    .col(ColumnDef::new(CrmSyncRuns::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(CrmSyncRuns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_crm_sync_runs_kind_created_at")
                    .table(CrmSyncRuns::Table)
                    .col(CrmSyncRuns::Kind)
                    .col(CrmSyncRuns::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_crm_sync_runs_kind_created_at")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(CrmSyncRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CrmSyncRuns {
    Table,
    Id,
    Kind,
    TriggeredBy,
    Status,
    Synced,
    Errors,
    DurationMs,
    ErrorMessage,
    CreatedAt,
}
