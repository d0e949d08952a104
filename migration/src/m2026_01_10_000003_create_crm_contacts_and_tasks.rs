//! Creates the local mirrors of CRM contacts and tasks.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CrmContacts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrmContacts::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CrmContacts::Name).text().not_null())
                    .col(ColumnDef::new(CrmContacts::FirstName).text().null())
                    .col(ColumnDef::new(CrmContacts::LastName).text().null())
                    .col(ColumnDef::new(CrmContacts::Email).text().null())
                    .col(ColumnDef::new(CrmContacts::Phone).text().null())
                    .col(
                        ColumnDef::new(CrmContacts::ResponsibleUserId)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(CrmContacts::AccountId).big_integer().null())
                    .col(ColumnDef::new(CrmContacts::CrmCreatedAt).big_integer().null())
                    .col(ColumnDef::new(CrmContacts::CrmUpdatedAt).big_integer().null())
                    .col(
                        ColumnDef::new(CrmContacts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CrmContacts::UpdatedAt)
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
                    .table(CrmTasks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrmTasks::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CrmTasks::Text).text().not_null())
                    .col(
                        ColumnDef::new(CrmTasks::TaskTypeId)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(CrmTasks::CompleteTill).big_integer().not_null())
                    .col(
                        ColumnDef::new(CrmTasks::IsCompleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(CrmTasks::ResponsibleUserId).big_integer().null())
                    .col(ColumnDef::new(CrmTasks::EntityId).big_integer().null())
                    .col(ColumnDef::new(CrmTasks::EntityType).text().null())
                    .col(ColumnDef::new(CrmTasks::Duration).big_integer().null())
                    .col(ColumnDef::new(CrmTasks::ResultText).text().null())
                    .col(ColumnDef::new(CrmTasks::CreatedBy).big_integer().null())
                    .col(ColumnDef::new(CrmTasks::UpdatedBy).big_integer().null())
                    .col(ColumnDef::new(CrmTasks::AccountId).big_integer().null())
                    .col(ColumnDef::new(CrmTasks::CrmCreatedAt).big_integer().null())
                    .col(ColumnDef::new(CrmTasks::CrmUpdatedAt).big_integer().null())
                    .col(
                        ColumnDef::new(CrmTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CrmTasks::UpdatedAt)
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
                    .name("idx_crm_tasks_entity")
                    .table(CrmTasks::Table)
                    .col(CrmTasks::EntityType)
                    .col(CrmTasks::EntityId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_crm_tasks_entity").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CrmTasks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CrmContacts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CrmContacts {
    Table,
    Id,
    Name,
    FirstName,
    LastName,
    Email,
    Phone,
    ResponsibleUserId,
    AccountId,
    CrmCreatedAt,
    CrmUpdatedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CrmTasks {
    Table,
    Id,
    Text,
    TaskTypeId,
    CompleteTill,
    IsCompleted,
    ResponsibleUserId,
    EntityId,
    EntityType,
    Duration,
    ResultText,
    CreatedBy,
    UpdatedBy,
    AccountId,
    CrmCreatedAt,
    CrmUpdatedAt,
    CreatedAt,
    UpdatedAt,
}
