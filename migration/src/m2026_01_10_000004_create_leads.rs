//! Creates the application-owned `properties` and `leads` tables the sync engine
//! reads from and writes back to.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Properties::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Properties::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Properties::Title).text().not_null())
                    .col(ColumnDef::new(Properties::Price).big_integer().null())
                    .col(
                        ColumnDef::new(Properties::CreatedAt)
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
                    .table(Leads::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Leads::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Leads::PropertyId).uuid().null())
                    .col(ColumnDef::new(Leads::GuestName).text().null())
                    .col(ColumnDef::new(Leads::GuestPhone).text().null())
                    .col(ColumnDef::new(Leads::GuestEmail).text().null())
                    .col(ColumnDef::new(Leads::Comment).text().null())
                    .col(
                        ColumnDef::new(Leads::Status)
                            .string_len(16)
                            .not_null()
                            .default("NEW"),
                    )
                    .col(ColumnDef::new(Leads::CrmLeadId).big_integer().null())
                    .col(ColumnDef::new(Leads::CrmContactId).big_integer().null())
                    .col(ColumnDef::new(Leads::ResponsibleUserId).big_integer().null())
                    .col(ColumnDef::new(Leads::CrmLeadName).text().null())
                    .col(
                        ColumnDef::new(Leads::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Leads::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_leads_property_id")
                            .from(Leads::Table, Leads::PropertyId)
                            .to(Properties::Table, Properties::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Reconciliation key: at most one local lead per CRM lead.
        manager
            .create_index(
                Index::create()
                    .name("idx_leads_crm_lead_id")
                    .table(Leads::Table)
                    .col(Leads::CrmLeadId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_leads_crm_lead_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Leads::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Properties::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Properties {
    Table,
    Id,
    Title,
    Price,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Leads {
    Table,
    Id,
    PropertyId,
    GuestName,
    GuestPhone,
    GuestEmail,
    Comment,
    Status,
    CrmLeadId,
    CrmContactId,
    ResponsibleUserId,
    CrmLeadName,
    CreatedAt,
    UpdatedAt,
}
