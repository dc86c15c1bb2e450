//! Security audit trail.
//!
//! Every entry goes to the `audit_logs` table and, when configured, to an
//! append-only text file. Recording never fails from the caller's point of
//! view: problems are logged and reported as a degraded [`Outcome`].

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::client::ClientInfo;
use crate::error::{Outcome, WardenError};
use crate::models::{audit_log, user};

/// Security-relevant actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    LoginSuccess,
    LoginFailed,
    LoginError,
    Logout,
    SessionRevoked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::LoginError => "LOGIN_ERROR",
            AuditAction::Logout => "LOGOUT",
            AuditAction::SessionRevoked => "SESSION_REVOKED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit entry joined with the acting user's name, for display.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditEntry {
    pub id: i32,
    pub user_id: Option<i32>,
    pub username: Option<String>,
    pub action: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub details: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Activity over the trailing 24 hours.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DailyStats {
    pub total_logs: u64,
    pub unique_ips: u64,
    pub unique_users: u64,
}

/// Writer and reader for the audit trail.
#[derive(Clone)]
pub struct AuditLog {
    db: DatabaseConnection,
    file: Option<Arc<PathBuf>>,
}

impl AuditLog {
    pub fn new(db: DatabaseConnection, file: Option<PathBuf>) -> Self {
        Self {
            db,
            file: file.map(Arc::new),
        }
    }

    /// Path of the secondary log, if enabled.
    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_deref().map(PathBuf::as_path)
    }

    /// Record one event in the database and the secondary log.
    ///
    /// Both sinks are attempted even if the first one fails.
    pub async fn record(
        &self,
        client: &ClientInfo,
        user_id: Option<i32>,
        action: AuditAction,
        details: impl Into<String>,
    ) -> Outcome<()> {
        let details = details.into();
        let mut failures = Vec::new();

        if let Err(e) = self.insert_entry(client, user_id, action, &details).await {
            tracing::error!(action = %action, error = %e, "audit database write failed");
            failures.push(format!("database: {}", e));
        }

        if let Some(path) = self.file.clone() {
            let line = format_line(Local::now(), client, user_id, action, &details);
            if let Err(e) = append_line(path, line).await {
                tracing::error!(action = %action, error = %e, "audit file write failed");
                failures.push(format!("file: {}", e));
            }
        }

        if failures.is_empty() {
            Outcome::Ok(())
        } else {
            Outcome::degraded((), failures.join("; "))
        }
    }

    async fn insert_entry(
        &self,
        client: &ClientInfo,
        user_id: Option<i32>,
        action: AuditAction,
        details: &str,
    ) -> Result<(), WardenError> {
        audit_log::ActiveModel {
            user_id: Set(user_id),
            action: Set(action.as_str().to_string()),
            ip_address: Set(client.ip.to_string()),
            user_agent: Set(Some(client.user_agent.clone())),
            details: Set(Some(details.to_string())),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    /// Newest entries first. Empty on failure.
    pub async fn list_recent(&self, limit: u64) -> Vec<AuditEntry> {
        let rows = audit_log::Entity::find()
            .find_also_related(user::Entity)
            .order_by_desc(audit_log::Column::CreatedAt)
            .order_by_desc(audit_log::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(|(entry, owner)| AuditEntry {
                    id: entry.id,
                    user_id: entry.user_id,
                    username: owner.map(|u| u.username),
                    action: entry.action,
                    ip_address: entry.ip_address,
                    user_agent: entry.user_agent,
                    details: entry.details,
                    created_at: entry.created_at,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list audit entries");
                Vec::new()
            }
        }
    }

    /// Totals for the trailing 24 hours. Zeroes on failure.
    pub async fn daily_stats(&self) -> DailyStats {
        match self.try_daily_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "failed to compute audit stats");
                DailyStats::default()
            }
        }
    }

    async fn try_daily_stats(&self) -> Result<DailyStats, WardenError> {
        let cutoff = Utc::now().naive_utc() - Duration::hours(24);

        let total_logs = audit_log::Entity::find()
            .filter(audit_log::Column::CreatedAt.gte(cutoff))
            .count(&self.db)
            .await?;

        let unique_ips = audit_log::Entity::find()
            .select_only()
            .column(audit_log::Column::IpAddress)
            .distinct()
            .filter(audit_log::Column::CreatedAt.gte(cutoff))
            .into_tuple::<String>()
            .all(&self.db)
            .await?
            .len() as u64;

        let unique_users = audit_log::Entity::find()
            .select_only()
            .column(audit_log::Column::UserId)
            .distinct()
            .filter(audit_log::Column::CreatedAt.gte(cutoff))
            .filter(audit_log::Column::UserId.is_not_null())
            .into_tuple::<i32>()
            .all(&self.db)
            .await?
            .len() as u64;

        Ok(DailyStats {
            total_logs,
            unique_ips,
            unique_users,
        })
    }
}

/// One line of the secondary log:
/// `[dd/mm/YYYY HH:MM:SS] IP: <addr> | User: <id> | Action: <action> | Details: <details>`
pub fn format_line(
    at: DateTime<Local>,
    client: &ClientInfo,
    user_id: Option<i32>,
    action: AuditAction,
    details: &str,
) -> String {
    let user = user_id.map(|id| id.to_string()).unwrap_or_default();
    // one event per line
    let details = details.replace(['\r', '\n'], " ");
    format!(
        "[{}] IP: {} | User: {} | Action: {} | Details: {}\n",
        at.format("%d/%m/%Y %H:%M:%S"),
        client.ip,
        user,
        action,
        details
    )
}

/// Append under an exclusive lock so concurrent writers never interleave.
async fn append_line(path: Arc<PathBuf>, line: String) -> io::Result<()> {
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path.as_path())?;
        file.lock()?;
        let written = file.write_all(line.as_bytes());
        file.unlock()?;
        written
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_format_matches_log_layout() {
        let at = Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        let client = ClientInfo {
            ip: "203.0.113.9".parse().unwrap(),
            peer_ip: None,
            user_agent: "test".into(),
        };
        assert_eq!(
            format_line(at, &client, Some(1), AuditAction::LoginSuccess, "Session created"),
            "[09/03/2025 14:05:07] IP: 203.0.113.9 | User: 1 | Action: LOGIN_SUCCESS | Details: Session created\n"
        );
        assert_eq!(
            format_line(at, &client, None, AuditAction::LoginFailed, "bad\nline"),
            "[09/03/2025 14:05:07] IP: 203.0.113.9 | User:  | Action: LOGIN_FAILED | Details: bad line\n"
        );
    }
}
