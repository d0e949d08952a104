//! # CRM Sync Library
//!
//! Keeps an application's lead store in step with an amoCRM-style account: OAuth
//! credential lifecycle, a mirrored pipeline/stage/role/user taxonomy, stage to
//! status mapping, bidirectional lead reconciliation and webhook routing.

pub mod auth;
pub mod config;
pub mod crm;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sync;
pub mod telemetry;
pub use migration;
