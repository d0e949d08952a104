//! # Data Models
//!
//! SeaORM entities for the CRM mirror tables and the application-owned lead tables.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod contact;
pub mod credential;
pub mod crm_role;
pub mod crm_user;
pub mod lead;
pub mod pipeline;
pub mod property;
pub mod stage;
pub mod sync_run;
pub mod task;

pub use lead::LeadStatus;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "crm-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
