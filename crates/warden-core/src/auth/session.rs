//! Session lifecycle: creation, validation, enumeration and revocation.
//!
//! A session is alive only while both halves agree: the client-held
//! [`SessionContext`] must have been active within the timeout, and the
//! durable row must be active, unexpired and owned by an active user.
//! Ending a session never deletes its row; it flips `is_active` so audit
//! entries keep their linkage.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::audit::{AuditAction, AuditLog};
use crate::auth::client::ClientInfo;
use crate::auth::context::SessionContext;
use crate::auth::token::{generate_session_token, token_fingerprint};
use crate::config::{RevocationPolicy, SecurityConfig};
use crate::error::{Outcome, WardenError};
use crate::models::{session, user};

/// Fresh tokens tried before giving up on a uniqueness conflict.
const TOKEN_ATTEMPTS: u32 = 3;

/// A validated session joined with its owner.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub session: session::Model,
    pub user: user::Model,
}

/// Listing row for an active session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionSummary {
    pub id: i32,
    pub user_id: i32,
    pub username: String,
    pub session_token: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub last_activity: NaiveDateTime,
}

impl SessionSummary {
    fn new(session: session::Model, owner: user::Model) -> Self {
        SessionSummary {
            id: session.id,
            user_id: session.user_id,
            username: owner.username,
            session_token: session.token,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            created_at: session.created_at,
            expires_at: session.expires_at,
            last_activity: session.last_activity,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionStats {
    pub active_sessions: u64,
    pub unique_users: u64,
}

type TokenSource = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct SessionManager {
    db: DatabaseConnection,
    audit: AuditLog,
    token_source: TokenSource,
    timeout: Duration,
    cleanup_probability: f64,
    revocation_policy: RevocationPolicy,
}

impl SessionManager {
    pub fn new(db: DatabaseConnection, audit: AuditLog, security: &SecurityConfig) -> Self {
        Self {
            db,
            audit,
            token_source: Arc::new(generate_session_token),
            timeout: Duration::from_std(security.session_timeout())
                .unwrap_or_else(|_| Duration::minutes(30)),
            cleanup_probability: security.session_cleanup_probability,
            revocation_policy: security.revocation_policy,
        }
    }

    /// Replace the token generator. The store's uniqueness constraint still
    /// applies, so a colliding generator only costs retries.
    pub fn with_token_source(
        mut self,
        source: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.token_source = Arc::new(source);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn revocation_policy(&self) -> RevocationPolicy {
        self.revocation_policy
    }

    /// Mint a session for an authenticated user and bind `ctx` to it.
    ///
    /// The session row and the user's `last_login` are written in one
    /// transaction; on failure nothing is applied and `ctx` is untouched.
    pub async fn create_session(
        &self,
        ctx: &mut SessionContext,
        client: &ClientInfo,
        user_id: i32,
        username: &str,
    ) -> Result<String, WardenError> {
        let mut attempt = 1;
        let (token, now) = loop {
            let token = (self.token_source)();
            let now = Utc::now().naive_utc();
            match self.persist_session(&token, user_id, client, now).await {
                Ok(()) => break (token, now),
                Err(WardenError::Conflict(detail)) if attempt < TOKEN_ATTEMPTS => {
                    tracing::warn!(user_id, attempt, detail = %detail, "session token collision, regenerating");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(user_id, error = %e, "failed to create session");
                    return Err(e);
                }
            }
        };

        ctx.establish(token.as_str(), user_id, username, now);
        self.audit(
            client,
            Some(user_id),
            AuditAction::LoginSuccess,
            format!("Session created for user: {}", username),
        )
        .await;

        tracing::info!(user_id, session = %token_fingerprint(&token), "session created");
        Ok(token)
    }

    async fn persist_session(
        &self,
        token: &str,
        user_id: i32,
        client: &ClientInfo,
        now: NaiveDateTime,
    ) -> Result<(), WardenError> {
        let txn = self.db.begin().await?;

        let touched = user::Entity::update_many()
            .col_expr(user::Column::LastLogin, Expr::value(Some(now)))
            .filter(user::Column::Id.eq(user_id))
            .exec(&txn)
            .await?;
        if touched.rows_affected == 0 {
            return Err(WardenError::NotFound(format!("user {}", user_id)));
        }

        session::ActiveModel {
            user_id: Set(user_id),
            token: Set(token.to_string()),
            ip_address: Set(client.ip.to_string()),
            user_agent: Set(client.user_agent.clone()),
            created_at: Set(now),
            expires_at: Set(now + self.timeout),
            last_activity: Set(now),
            is_active: Set(true),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(())
    }

    /// Check the caller's session on both the local and the durable side.
    ///
    /// Any failure ends the session and clears `ctx`. On success the
    /// activity marker and the stored expiry both move forward.
    pub async fn validate_session(
        &self,
        ctx: &mut SessionContext,
        client: &ClientInfo,
    ) -> Option<ActiveSession> {
        self.maybe_clean_expired_sessions().await;

        let (Some(token), Some(user_id), Some(last_activity)) =
            (ctx.token().map(str::to_owned), ctx.user_id(), ctx.last_activity())
        else {
            return None;
        };

        let now = Utc::now().naive_utc();
        if now - last_activity > self.timeout {
            tracing::debug!(user_id, "session timed out locally");
            self.end_after_failed_validation(ctx, client).await;
            return None;
        }
        ctx.touch(now);

        match self.durable_check(&token, user_id, now).await {
            Ok(Some(active)) => return Some(active),
            Ok(None) => tracing::debug!(user_id, "session inactive or expired in store"),
            Err(e) => tracing::warn!(user_id, error = %e, "session validation failed"),
        }

        self.end_after_failed_validation(ctx, client).await;
        None
    }

    async fn durable_check(
        &self,
        token: &str,
        user_id: i32,
        now: NaiveDateTime,
    ) -> Result<Option<ActiveSession>, WardenError> {
        let found = session::Entity::find()
            .find_also_related(user::Entity)
            .filter(session::Column::Token.eq(token))
            .filter(session::Column::UserId.eq(user_id))
            .filter(session::Column::IsActive.eq(true))
            .filter(session::Column::ExpiresAt.gt(now))
            .one(&self.db)
            .await?;

        let Some((session, Some(user))) = found else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }

        let mut active: session::ActiveModel = session.into();
        active.last_activity = Set(now);
        active.expires_at = Set(now + self.timeout);
        let session = active.update(&self.db).await?;

        Ok(Some(ActiveSession { session, user }))
    }

    async fn end_after_failed_validation(&self, ctx: &mut SessionContext, client: &ClientInfo) {
        if let Err(e) = self.destroy_session(ctx, client).await {
            tracing::warn!(error = %e, "failed to deactivate rejected session");
        }
    }

    /// End the caller's session. A no-op for an empty context.
    ///
    /// `ctx` is cleared even when the store update fails.
    pub async fn destroy_session(
        &self,
        ctx: &mut SessionContext,
        client: &ClientInfo,
    ) -> Result<(), WardenError> {
        let result = match (ctx.token(), ctx.user_id()) {
            (Some(token), Some(user_id)) => {
                match session::Entity::update_many()
                    .col_expr(session::Column::IsActive, Expr::value(false))
                    .filter(session::Column::Token.eq(token))
                    .exec(&self.db)
                    .await
                {
                    Ok(_) => {
                        self.audit(client, Some(user_id), AuditAction::Logout, "Session ended")
                            .await;
                        Ok(())
                    }
                    Err(e) => Err(WardenError::from(e)),
                }
            }
            _ => Ok(()),
        };

        ctx.clear();
        result
    }

    /// Active, unexpired sessions, most recently used first.
    pub async fn get_active_sessions(
        &self,
        user_id: Option<i32>,
    ) -> Result<Vec<SessionSummary>, WardenError> {
        let now = Utc::now().naive_utc();
        let mut query = session::Entity::find()
            .find_also_related(user::Entity)
            .filter(session::Column::IsActive.eq(true))
            .filter(session::Column::ExpiresAt.gt(now));
        if let Some(user_id) = user_id {
            query = query.filter(session::Column::UserId.eq(user_id));
        }

        let rows = query
            .order_by_desc(session::Column::LastActivity)
            .order_by_desc(session::Column::Id)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(session, owner)| owner.map(|owner| SessionSummary::new(session, owner)))
            .collect())
    }

    /// Deactivate the session holding `token`.
    ///
    /// Under [`RevocationPolicy::Owner`] only the acting user's own sessions
    /// match. Returns `Ok(false)` when no active session matched.
    pub async fn revoke_session(
        &self,
        token: &str,
        acting_user_id: i32,
        client: &ClientInfo,
    ) -> Result<bool, WardenError> {
        let mut update = session::Entity::update_many()
            .col_expr(session::Column::IsActive, Expr::value(false))
            .filter(session::Column::Token.eq(token))
            .filter(session::Column::IsActive.eq(true));
        if self.revocation_policy == RevocationPolicy::Owner {
            update = update.filter(session::Column::UserId.eq(acting_user_id));
        }

        let fingerprint = token_fingerprint(token);
        let result = update.exec(&self.db).await.map_err(|e| {
            tracing::error!(acting_user_id, session = %fingerprint, error = %e, "failed to revoke session");
            WardenError::from(e)
        })?;

        if result.rows_affected == 0 {
            tracing::info!(acting_user_id, session = %fingerprint, "no revocable session matched");
            return Ok(false);
        }

        self.audit(
            client,
            Some(acting_user_id),
            AuditAction::SessionRevoked,
            format!("Session revoked: {}", fingerprint),
        )
        .await;
        Ok(true)
    }

    /// Counts over active, unexpired sessions. Zeroes on failure.
    pub async fn session_stats(&self) -> SessionStats {
        match self.try_session_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "failed to compute session stats");
                SessionStats::default()
            }
        }
    }

    async fn try_session_stats(&self) -> Result<SessionStats, WardenError> {
        let now = Utc::now().naive_utc();
        let live = || {
            session::Entity::find()
                .filter(session::Column::IsActive.eq(true))
                .filter(session::Column::ExpiresAt.gt(now))
        };

        let active_sessions = live().count(&self.db).await?;
        let unique_users = live()
            .select_only()
            .column(session::Column::UserId)
            .distinct()
            .into_tuple::<i32>()
            .all(&self.db)
            .await?
            .len() as u64;

        Ok(SessionStats {
            active_sessions,
            unique_users,
        })
    }

    /// Deactivate every session whose expiry has passed.
    pub async fn clean_expired_sessions(&self) -> Result<u64, WardenError> {
        let result = session::Entity::update_many()
            .col_expr(session::Column::IsActive, Expr::value(false))
            .filter(session::Column::IsActive.eq(true))
            .filter(session::Column::ExpiresAt.lte(Utc::now().naive_utc()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            tracing::info!(count = result.rows_affected, "deactivated expired sessions");
        }
        Ok(result.rows_affected)
    }

    /// Run [`Self::clean_expired_sessions`] with the configured probability.
    ///
    /// Returns the affected row count when the pass ran and succeeded.
    pub async fn maybe_clean_expired_sessions(&self) -> Option<u64> {
        if rand::random::<f64>() >= self.cleanup_probability {
            return None;
        }
        match self.clean_expired_sessions().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, "expired session cleanup failed");
                None
            }
        }
    }

    async fn audit(
        &self,
        client: &ClientInfo,
        user_id: Option<i32>,
        action: AuditAction,
        details: impl Into<String>,
    ) {
        if let Outcome::Degraded { reason, .. } =
            self.audit.record(client, user_id, action, details).await
        {
            tracing::warn!(action = %action, reason = %reason, "session event audited partially");
        }
    }
}
