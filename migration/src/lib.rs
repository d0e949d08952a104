//! Database migrations for the CRM sync service.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_000001_create_crm_credentials;
mod m2026_01_10_000002_create_crm_taxonomy;
mod m2026_01_10_000003_create_crm_contacts_and_tasks;
mod m2026_01_10_000004_create_leads;
mod m2026_01_10_000005_create_crm_sync_runs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_000001_create_crm_credentials::Migration),
            Box::new(m2026_01_10_000002_create_crm_taxonomy::Migration),
            Box::new(m2026_01_10_000003_create_crm_contacts_and_tasks::Migration),
            Box::new(m2026_01_10_000004_create_leads::Migration),
            Box::new(m2026_01_10_000005_create_crm_sync_runs::Migration),
        ]
    }
}
