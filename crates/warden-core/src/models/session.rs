use chrono::NaiveDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One authenticated client instance.
///
/// Rows are never deleted: logout, revocation and expiry all end with
/// `is_active = false` so audit entries keep pointing at something.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// The user who owns this session
    pub user_id: i32,

    /// Opaque random token, unique across all sessions ever issued
    #[sea_orm(unique)]
    pub token: String,

    /// Resolved client address at creation
    pub ip_address: String,

    /// User-Agent at creation
    pub user_agent: String,

    pub created_at: NaiveDateTime,

    /// Pushed forward on every validated request
    pub expires_at: NaiveDateTime,

    pub last_activity: NaiveDateTime,

    #[sea_orm(default_value = true)]
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
