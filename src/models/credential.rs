//! Credential entity: the OAuth token pair for one CRM account.
//!
//! One row per account, overwritten in place on every refresh and never deleted.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "crm_credentials")]
pub struct Model {
    /// External account id assigned by the CRM (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub account_id: i64,

    /// AES-GCM sealed access token
    pub access_token_ciphertext: Vec<u8>,

    /// AES-GCM sealed refresh token; rotated on every refresh
    pub refresh_token_ciphertext: Vec<u8>,

    /// Absolute access-token expiry, epoch milliseconds
    pub expires_at_ms: i64,

    /// Account host the tokens were issued for
    pub api_base_domain: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
