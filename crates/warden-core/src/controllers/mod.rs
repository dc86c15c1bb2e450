use std::sync::Arc;

use axum::http::{HeaderName, header};
use sea_orm::DatabaseConnection;

use crate::auth::{AuditLog, ContextCodec, RateLimiter, SessionContext, SessionManager};
use crate::config::Config;
use crate::error::WardenError;

pub mod auth;
pub mod sessions;
pub mod stats;

/// Shared application state available in all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<Config>,
    pub audit: AuditLog,
    pub rate_limiter: RateLimiter,
    pub sessions: SessionManager,
    pub codec: ContextCodec,
}

impl AppState {
    /// Wire the security components over one connection pool.
    ///
    /// Refuses a config that fails [`Config::validate`].
    pub fn new(db: DatabaseConnection, config: Config) -> Result<Self, WardenError> {
        config.validate().map_err(WardenError::ValidationFailed)?;
        let security = &config.security;
        let audit = AuditLog::new(db.clone(), config.audit_log_path.clone());
        let rate_limiter = RateLimiter::new(db.clone(), security.block_duration());
        let sessions = SessionManager::new(db.clone(), audit.clone(), security);
        let codec = ContextCodec::new(
            &config.session_secret,
            security.session_timeout_secs,
            config.is_production(),
        )?;

        Ok(AppState {
            db,
            config: Arc::new(config),
            audit,
            rate_limiter,
            sessions,
            codec,
        })
    }
}

/// `Set-Cookie` header carrying `ctx`, or clearing it when empty.
pub fn context_cookie(codec: &ContextCodec, ctx: &SessionContext) -> [(HeaderName, String); 1] {
    [(header::SET_COOKIE, codec.set_cookie(ctx))]
}
