use chrono::NaiveDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Throttling state for one (identifier, action type) pair.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rate_limits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Usually the client network address
    pub identifier: String,

    /// Guarded operation, e.g. `LOGIN_ATTEMPT`
    pub action_type: String,

    pub attempt_count: i32,

    pub first_attempt: NaiveDateTime,

    pub last_attempt: NaiveDateTime,

    #[sea_orm(default_value = false)]
    pub is_blocked: bool,

    pub block_until: Option<NaiveDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Blocked with an expiry still in the future.
    pub fn is_blocked_at(&self, now: NaiveDateTime) -> bool {
        self.is_blocked && self.block_until.is_some_and(|until| until > now)
    }
}
