use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{ActionStats, AuditEntry, DailyStats, SessionStats};
use crate::extractors::Authenticated;
use crate::response::ApiResponse;

use super::{AppState, context_cookie};

/// Entries shown in the recent activity feed.
pub const RECENT_ACTIVITY_LIMIT: u64 = 20;

/// Security overview: live sessions, audit volume, throttle state and the
/// latest audit entries.
#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardStats {
    pub sessions: SessionStats,
    pub audit: DailyStats,
    pub rate_limits: Vec<ActionStats>,
    pub recent_activity: Vec<AuditEntry>,
}

impl DashboardStats {
    /// Every part is best-effort; a failing source contributes zeroes.
    pub async fn collect(state: &AppState) -> Self {
        DashboardStats {
            sessions: state.sessions.session_stats().await,
            audit: state.audit.daily_stats().await,
            rate_limits: state.rate_limiter.get_stats().await,
            recent_activity: state.audit.list_recent(RECENT_ACTIVITY_LIMIT).await,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/stats", get(stats))
}

#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Security overview", body = DashboardStats),
        (status = 401, description = "No valid session")
    ),
    tag = "stats"
)]
pub async fn stats(State(state): State<AppState>, auth: Authenticated) -> Response {
    let stats = DashboardStats::collect(&state).await;
    (
        context_cookie(&state.codec, &auth.context),
        ApiResponse::success(stats),
    )
        .into_response()
}
