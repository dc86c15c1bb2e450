use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database as SeaDatabase, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use std::time::Duration;

use crate::auth::password::hash_password;
use crate::config::Config;
use crate::error::WardenError;
use crate::models::user;

pub const DEMO_USERNAME: &str = "admin";
pub const DEMO_EMAIL: &str = "admin@system.com";
pub const DEMO_PASSWORD: &str = "admin123";

/// Initialize the database connection from config.
pub async fn connect(config: &Config) -> Result<DatabaseConnection, sea_orm::DbErr> {
    let mut opts = ConnectOptions::new(&config.database_url);
    opts.connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(config.is_dev());

    if is_in_memory(&config.database_url) {
        // Each pooled connection would otherwise see its own empty database.
        opts.max_connections(1).min_connections(1);
    } else {
        opts.max_connections(100)
            .min_connections(5)
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800));
    }

    SeaDatabase::connect(opts).await
}

fn is_in_memory(url: &str) -> bool {
    url.starts_with("sqlite:") && url.contains(":memory:")
}

/// Insert the demo account if no user named `admin` exists yet.
///
/// Returns `true` when the account was created.
pub async fn seed_demo_user(db: &DatabaseConnection) -> Result<bool, WardenError> {
    let existing = user::Entity::find()
        .filter(user::Column::Username.eq(DEMO_USERNAME))
        .count(db)
        .await?;
    if existing > 0 {
        return Ok(false);
    }

    let now = chrono::Utc::now().naive_utc();
    user::ActiveModel {
        username: Set(DEMO_USERNAME.to_string()),
        email: Set(DEMO_EMAIL.to_string()),
        password_hash: Set(hash_password(DEMO_PASSWORD)?),
        is_active: Set(true),
        created_at: Set(now),
        last_login: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;

    tracing::info!(username = DEMO_USERNAME, "seeded demo user");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::is_in_memory;

    #[test]
    fn detects_in_memory_sqlite_urls() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://:memory:"));
        assert!(!is_in_memory("sqlite://warden.db?mode=rwc"));
        assert!(!is_in_memory("postgres://localhost/warden"));
    }
}
