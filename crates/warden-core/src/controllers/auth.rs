use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::NaiveDateTime;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::{
    AuditAction, ClientInfo, LOGIN_ATTEMPT, SessionContext, token_fingerprint, verify_password,
};
use crate::error::{Outcome, WardenError};
use crate::extractors::CurrentContext;
use crate::models::user::{self, Entity as User, UserSummary};
use crate::response::ApiResponse;

use super::{AppState, context_cookie};

// ── Request / Response types ──

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    /// Username or email address
    #[serde(default)]
    #[validate(length(min = 1))]
    pub username: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub user: UserSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginFailure {
    pub remaining_attempts: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Throttled {
    pub reset_time: Option<NaiveDateTime>,
}

// ── Routes ──

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", get(logout).post(logout))
}

// ── Handlers ──

/// Authenticate with username (or email) and password.
///
/// On success the session context cookie is set.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Invalid credentials", body = LoginFailure),
        (status = 429, description = "Too many attempts from this address", body = Throttled),
        (status = 500, description = "Internal failure")
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    body: Bytes,
) -> Result<Response, WardenError> {
    let security = &state.config.security;

    // Throttle before looking at the body so malformed requests count too
    let decision = match state
        .rate_limiter
        .check_attempt(
            &client.throttle_key(),
            LOGIN_ATTEMPT,
            security.max_login_attempts,
            security.rate_limit_window(),
        )
        .await
    {
        Outcome::Ok(decision) => decision,
        Outcome::Degraded { value, reason } => {
            tracing::warn!(reason = %reason, "login throttle degraded, allowing attempt");
            value
        }
        Outcome::Fatal(e) => return Err(e),
    };

    if !decision.allowed {
        let reason = decision
            .reason
            .unwrap_or_else(|| "Too many attempts".to_string());
        return Ok(ApiResponse::failure(StatusCode::TOO_MANY_REQUESTS, reason)
            .with_data(Throttled {
                reset_time: decision.reset_at,
            })
            .into_response());
    }

    let payload: LoginRequest = serde_json::from_slice(&body).unwrap_or_default();
    if payload.validate().is_err() {
        audit(&state, &client, None, AuditAction::LoginFailed, "Empty credentials").await;
        return Ok(ApiResponse::<()>::failure(
            StatusCode::BAD_REQUEST,
            "Username and password are required",
        )
        .into_response());
    }

    let account = User::find()
        .filter(
            Condition::any()
                .add(user::Column::Username.eq(&payload.username))
                .add(user::Column::Email.eq(&payload.username)),
        )
        .one(&state.db)
        .await;
    let account = match account {
        Ok(account) => account,
        Err(e) => {
            tracing::error!(error = %e, "login lookup failed");
            audit(&state, &client, None, AuditAction::LoginError, "Database error").await;
            return Err(e.into());
        }
    };

    let user_model = match account {
        Some(u) if u.is_active && verify_password(&payload.password, &u.password_hash) => u,
        other => {
            audit(
                &state,
                &client,
                other.map(|u| u.id),
                AuditAction::LoginFailed,
                format!("Invalid credentials for: {}", payload.username),
            )
            .await;
            return Ok(ApiResponse::failure(
                StatusCode::UNAUTHORIZED,
                "Invalid username or password",
            )
            .with_data(LoginFailure {
                remaining_attempts: decision.remaining,
            })
            .into_response());
        }
    };

    let mut ctx = SessionContext::new();
    let token = match state
        .sessions
        .create_session(&mut ctx, &client, user_model.id, &user_model.username)
        .await
    {
        Ok(token) => token,
        Err(e) => {
            audit(
                &state,
                &client,
                Some(user_model.id),
                AuditAction::LoginError,
                "Failed to create session",
            )
            .await;
            return Err(e);
        }
    };

    if let Outcome::Degraded { reason, .. } = state
        .rate_limiter
        .clear(&client.throttle_key(), LOGIN_ATTEMPT)
        .await
    {
        tracing::warn!(reason = %reason, "login throttle not cleared after success");
    }

    tracing::info!(
        user_id = user_model.id,
        session = %token_fingerprint(&token),
        "user logged in"
    );

    Ok((
        context_cookie(&state.codec, &ctx),
        ApiResponse::success(LoginResponse {
            user: UserSummary::from(&user_model),
        })
        .with_message("Login successful"),
    )
        .into_response())
}

/// End the caller's session and redirect to the root page.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 303, description = "Session ended, redirect to /")
    ),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    client: ClientInfo,
    CurrentContext(mut ctx): CurrentContext,
) -> impl IntoResponse {
    if let Err(e) = state.sessions.destroy_session(&mut ctx, &client).await {
        tracing::warn!(error = %e, "logout could not deactivate session");
    }
    (context_cookie(&state.codec, &ctx), Redirect::to("/"))
}

async fn audit(
    state: &AppState,
    client: &ClientInfo,
    user_id: Option<i32>,
    action: AuditAction,
    details: impl Into<String>,
) {
    if let Outcome::Degraded { reason, .. } =
        state.audit.record(client, user_id, action, details).await
    {
        tracing::warn!(action = %action, reason = %reason, "login event audited partially");
    }
}
