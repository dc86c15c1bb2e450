use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime, Utc};
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{Outcome, WardenError};
use crate::models::rate_limit;

/// Action type guarding the login endpoint.
pub const LOGIN_ATTEMPT: &str = "LOGIN_ATTEMPT";

const STILL_BLOCKED: &str = "Too many attempts. Try again later.";
const NEWLY_BLOCKED: &str = "Too many attempts. Temporarily blocked.";

/// Retries of the read-modify-write after losing a race for the record.
const CONTENTION_RETRIES: u32 = 8;
const CONTENTION_BACKOFF: std::time::Duration = std::time::Duration::from_millis(10);

/// Verdict for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AttemptDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// End of the counting window, or of the block when refused.
    pub reset_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AttemptDecision {
    fn allow(remaining: u32, reset_at: NaiveDateTime) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at: Some(reset_at),
            reason: None,
        }
    }

    fn deny(reason: &str, until: Option<NaiveDateTime>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at: until,
            reason: Some(reason.to_string()),
        }
    }

    /// What the caller proceeds with when the store cannot be consulted.
    pub fn fail_open(max_attempts: u32) -> Self {
        Self {
            allowed: true,
            remaining: max_attempts,
            reset_at: None,
            reason: None,
        }
    }
}

/// Per-action aggregate for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ActionStats {
    pub action_type: String,
    /// Tracked (identifier, action) pairs
    pub tracked: u64,
    /// Attempts recorded across those pairs
    pub attempts: u64,
    /// Pairs whose block has not lapsed yet
    pub blocked: u64,
}

/// Attempt throttle backed by the `rate_limits` table.
///
/// The read-modify-write for one (identifier, action type) pair runs in a
/// single transaction that takes the write lock before reading, so
/// concurrent attempts cannot both slip past the ceiling. A transaction
/// that loses the race is retried, not failed open.
#[derive(Clone)]
pub struct RateLimiter {
    db: DatabaseConnection,
    block_duration: Duration,
}

impl RateLimiter {
    pub fn new(db: DatabaseConnection, block_duration: std::time::Duration) -> Self {
        Self {
            db,
            block_duration: Duration::from_std(block_duration)
                .unwrap_or_else(|_| Duration::minutes(15)),
        }
    }

    /// Count one attempt and decide whether it may proceed.
    ///
    /// Storage failures fail open: the result is `Degraded` carrying an
    /// allowing decision with the full allowance remaining.
    pub async fn check_attempt(
        &self,
        identifier: &str,
        action_type: &str,
        max_attempts: u32,
        window: std::time::Duration,
    ) -> Outcome<AttemptDecision> {
        if max_attempts == 0 {
            return Outcome::Fatal(WardenError::ValidationFailed(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        let Ok(window) = Duration::from_std(window) else {
            return Outcome::Fatal(WardenError::ValidationFailed(
                "window is out of range".to_string(),
            ));
        };

        if let Err(e) = self.purge_stale(Utc::now().naive_utc(), window).await {
            tracing::warn!(error = %e, "failed to purge stale rate limit records");
        }

        let mut retries = 0;
        let result = loop {
            let now = Utc::now().naive_utc();
            match self
                .evaluate(identifier, action_type, max_attempts, window, now)
                .await
            {
                Err(e) if retries < CONTENTION_RETRIES && is_contention(&e) => {
                    retries += 1;
                    tracing::debug!(identifier, action_type, retries, error = %e, "throttle record contended, retrying");
                    tokio::time::sleep(CONTENTION_BACKOFF * retries).await;
                }
                other => break other.map_err(WardenError::from),
            }
        };

        match result {
            Ok(decision) => {
                if !decision.allowed {
                    tracing::info!(
                        identifier,
                        action_type,
                        until = ?decision.reset_at,
                        "attempt refused by throttle"
                    );
                }
                Outcome::Ok(decision)
            }
            Err(e) => {
                tracing::error!(identifier, action_type, error = %e, "rate limit check failed, allowing");
                Outcome::degraded(AttemptDecision::fail_open(max_attempts), e.to_string())
            }
        }
    }

    async fn evaluate(
        &self,
        identifier: &str,
        action_type: &str,
        max_attempts: u32,
        window: Duration,
        now: NaiveDateTime,
    ) -> Result<AttemptDecision, DbErr> {
        let txn = self.db.begin().await?;

        // Write before reading so the transaction holds the write lock from
        // the start. SQLite ignores FOR UPDATE; without this two readers
        // race for the upgrade and one of them fails.
        rate_limit::Entity::update_many()
            .col_expr(
                rate_limit::Column::LastAttempt,
                SimpleExpr::from(Expr::col(rate_limit::Column::LastAttempt)),
            )
            .filter(rate_limit::Column::Identifier.eq(identifier))
            .filter(rate_limit::Column::ActionType.eq(action_type))
            .exec(&txn)
            .await?;

        let existing = rate_limit::Entity::find()
            .filter(rate_limit::Column::Identifier.eq(identifier))
            .filter(rate_limit::Column::ActionType.eq(action_type))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let decision = match existing {
            Some(record) if record.is_blocked_at(now) => {
                AttemptDecision::deny(STILL_BLOCKED, record.block_until)
            }
            Some(record) if record.is_blocked || record.first_attempt + window <= now => {
                // lapsed block or finished window: start a new one
                let mut active: rate_limit::ActiveModel = record.into();
                active.attempt_count = Set(1);
                active.first_attempt = Set(now);
                active.last_attempt = Set(now);
                active.is_blocked = Set(false);
                active.block_until = Set(None);
                active.update(&txn).await?;
                AttemptDecision::allow(max_attempts - 1, now + window)
            }
            Some(record) => {
                let count = u32::try_from(record.attempt_count)
                    .unwrap_or(0)
                    .saturating_add(1);
                let first_attempt = record.first_attempt;

                let mut active: rate_limit::ActiveModel = record.into();
                active.attempt_count = Set(i32::try_from(count).unwrap_or(i32::MAX));
                active.last_attempt = Set(now);

                if count >= max_attempts {
                    let until = now + self.block_duration;
                    active.is_blocked = Set(true);
                    active.block_until = Set(Some(until));
                    active.update(&txn).await?;
                    AttemptDecision::deny(NEWLY_BLOCKED, Some(until))
                } else {
                    active.update(&txn).await?;
                    AttemptDecision::allow(max_attempts - count, first_attempt + window)
                }
            }
            None => {
                rate_limit::ActiveModel {
                    identifier: Set(identifier.to_string()),
                    action_type: Set(action_type.to_string()),
                    attempt_count: Set(1),
                    first_attempt: Set(now),
                    last_attempt: Set(now),
                    is_blocked: Set(false),
                    block_until: Set(None),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                AttemptDecision::allow(max_attempts - 1, now + window)
            }
        };

        txn.commit().await?;
        Ok(decision)
    }

    /// Drop records idle for longer than the window, unless still blocked.
    async fn purge_stale(&self, now: NaiveDateTime, window: Duration) -> Result<u64, WardenError> {
        let result = rate_limit::Entity::delete_many()
            .filter(rate_limit::Column::LastAttempt.lt(now - window))
            .filter(
                Condition::any()
                    .add(rate_limit::Column::IsBlocked.eq(false))
                    .add(rate_limit::Column::BlockUntil.lte(now)),
            )
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Forget all attempts for the pair, blocked or not.
    pub async fn clear(&self, identifier: &str, action_type: &str) -> Outcome<()> {
        let result = rate_limit::Entity::delete_many()
            .filter(rate_limit::Column::Identifier.eq(identifier))
            .filter(rate_limit::Column::ActionType.eq(action_type))
            .exec(&self.db)
            .await;

        match result {
            Ok(_) => Outcome::Ok(()),
            Err(e) => {
                tracing::warn!(identifier, action_type, error = %e, "failed to clear rate limit");
                Outcome::degraded((), e.to_string())
            }
        }
    }

    /// Aggregates grouped by action type. Empty on failure.
    pub async fn get_stats(&self) -> Vec<ActionStats> {
        let records = match rate_limit::Entity::find().all(&self.db).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load rate limit stats");
                return Vec::new();
            }
        };

        let now = Utc::now().naive_utc();
        let mut grouped: BTreeMap<String, ActionStats> = BTreeMap::new();
        for record in records {
            let entry = grouped
                .entry(record.action_type.clone())
                .or_insert_with(|| ActionStats {
                    action_type: record.action_type.clone(),
                    ..Default::default()
                });
            entry.tracked += 1;
            entry.attempts += u64::try_from(record.attempt_count).unwrap_or(0);
            if record.is_blocked_at(now) {
                entry.blocked += 1;
            }
        }
        grouped.into_values().collect()
    }
}

/// Lost races that a retry resolves: a concurrent first attempt inserting
/// the same pair, or the store refusing a lock it will grant shortly.
fn is_contention(err: &DbErr) -> bool {
    if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    [
        "database is locked",
        "database table is locked",
        "deadlock",
        "could not serialize",
        "lock wait timeout",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_open_allows_with_full_allowance() {
        let decision = AttemptDecision::fail_open(5);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
        assert!(decision.reset_at.is_none());
    }

    #[test]
    fn denial_carries_reason_and_no_allowance() {
        let until = Utc::now().naive_utc();
        let decision = AttemptDecision::deny(NEWLY_BLOCKED, Some(until));
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, Some(until));
        assert_eq!(decision.reason.as_deref(), Some(NEWLY_BLOCKED));
    }

    #[test]
    fn lock_errors_are_contention_but_outages_are_not() {
        let busy = DbErr::Custom("error returned from database: (code: 5) database is locked".into());
        assert!(is_contention(&busy));
        let pg = DbErr::Custom("could not serialize access due to concurrent update".into());
        assert!(is_contention(&pg));

        let missing = DbErr::Custom("error returned from database: no such table: rate_limits".into());
        assert!(!is_contention(&missing));
        assert!(!is_contention(&DbErr::Custom("connection refused".into())));
    }
}
