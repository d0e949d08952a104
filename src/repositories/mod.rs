//! # Repository Layer
//!
//! Repositories encapsulating SeaORM access for the credential store, the CRM
//! mirror tables, the application-owned leads and the sync run log.

pub mod contact;
pub mod credential;
pub mod lead;
pub mod sync_run;
pub mod task;
pub mod taxonomy;

pub use contact::{ContactRecord, ContactRepository};
pub use credential::{CredentialRepository, StoredTokens};
pub use lead::{LeadRepository, LeadStore};
pub use sync_run::{NewSyncRun, SyncRunRepository};
pub use task::{TaskRecord, TaskRepository};
pub use taxonomy::TaxonomyRepository;
