//! Task entity: one-way mirror of CRM call/meeting tasks.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// `task_type_id` of a "call the client" task.
pub const TASK_TYPE_CALL: i64 = 1;
/// `task_type_id` of a meeting task.
pub const TASK_TYPE_MEETING: i64 = 2;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "crm_tasks")]
pub struct Model {
    /// CRM-assigned task id (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub text: String,

    pub task_type_id: i64,

    /// Deadline, epoch seconds
    pub complete_till: i64,

    pub is_completed: bool,

    pub responsible_user_id: Option<i64>,

    /// Id of the CRM entity the task is attached to
    pub entity_id: Option<i64>,

    /// Kind of the linked entity (`leads`, `contacts`, ...)
    pub entity_type: Option<String>,

    /// Duration in seconds
    pub duration: Option<i64>,

    pub result_text: Option<String>,

    pub created_by: Option<i64>,

    pub updated_by: Option<i64>,

    pub account_id: Option<i64>,

    pub crm_created_at: Option<i64>,

    pub crm_updated_at: Option<i64>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
