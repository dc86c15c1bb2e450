use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::SessionSummary;
use crate::error::WardenError;
use crate::extractors::{Authenticated, Json};
use crate::response::ApiResponse;

use super::{AppState, context_cookie};

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionSummary,
    /// Whether this is the session making the request
    pub is_current: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionList {
    pub sessions: Vec<SessionView>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SessionAction {
    /// Only `revoke` is supported
    pub action: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    #[serde(default)]
    pub session_token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/sessions", get(list_sessions).post(session_action))
}

/// List the caller's active sessions.
#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "Active sessions, most recent first", body = SessionList),
        (status = 401, description = "No valid session")
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<Response, WardenError> {
    let current = auth.context.token().unwrap_or_default();
    let sessions = state
        .sessions
        .get_active_sessions(Some(auth.active.user.id))
        .await?
        .into_iter()
        .map(|session| SessionView {
            is_current: session.session_token == current,
            session,
        })
        .collect();

    Ok((
        context_cookie(&state.codec, &auth.context),
        ApiResponse::success(SessionList { sessions }),
    )
        .into_response())
}

/// Act on a session. `?action=revoke` deactivates the session whose token
/// is given in the body.
#[utoipa::path(
    post,
    path = "/api/sessions",
    params(SessionAction),
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "Session revoked"),
        (status = 400, description = "Unknown action or missing token"),
        (status = 401, description = "No valid session"),
        (status = 404, description = "No revocable session with that token"),
        (status = 500, description = "Revocation failed")
    ),
    tag = "sessions"
)]
pub async fn session_action(
    State(state): State<AppState>,
    Query(query): Query<SessionAction>,
    auth: Authenticated,
    Json(payload): Json<RevokeRequest>,
) -> Response {
    let cookie = context_cookie(&state.codec, &auth.context);

    if query.action.as_deref() != Some("revoke") {
        return (
            cookie,
            ApiResponse::<()>::failure(StatusCode::BAD_REQUEST, "Invalid action"),
        )
            .into_response();
    }

    let token = payload.session_token.trim();
    if token.is_empty() {
        return (
            cookie,
            ApiResponse::<()>::failure(StatusCode::BAD_REQUEST, "Session token is required"),
        )
            .into_response();
    }

    let body = match state
        .sessions
        .revoke_session(token, auth.active.user.id, &auth.client)
        .await
    {
        Ok(true) => ApiResponse::ok_message("Session revoked successfully"),
        Ok(false) => ApiResponse::failure(StatusCode::NOT_FOUND, "Session not found"),
        Err(_) => ApiResponse::failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to revoke session",
        ),
    };
    (cookie, body).into_response()
}
