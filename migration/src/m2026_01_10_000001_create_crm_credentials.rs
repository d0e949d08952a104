//! Creates the crm_credentials table holding the OAuth token pair per CRM account.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CrmCredentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrmCredentials::AccountId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CrmCredentials::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CrmCredentials::RefreshTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CrmCredentials::ExpiresAtMs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CrmCredentials::ApiBaseDomain).text().not_null())
                    .col(
                        ColumnDef::new(CrmCredentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CrmCredentials::UpdatedAt)
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
            .drop_table(Table::drop().table(CrmCredentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CrmCredentials {
    Table,
    AccountId,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAtMs,
    ApiBaseDomain,
    CreatedAt,
    UpdatedAt,
}
