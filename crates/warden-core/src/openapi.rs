use utoipa::OpenApi;

use crate::auth::{ActionStats, AuditEntry, DailyStats, SessionStats, SessionSummary};
use crate::controllers::auth::{LoginFailure, LoginRequest, LoginResponse, Throttled};
use crate::controllers::sessions::{RevokeRequest, SessionList, SessionView};
use crate::controllers::stats::DashboardStats;
use crate::models::user::UserSummary;

/// OpenAPI document for the warden endpoints.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Warden API",
        version = "0.1.0",
        description = "Session lifecycle, login throttling and security audit."
    ),
    paths(
        crate::controllers::auth::login,
        crate::controllers::auth::logout,
        crate::controllers::sessions::list_sessions,
        crate::controllers::sessions::session_action,
        crate::controllers::stats::stats,
    ),
    components(
        schemas(
            LoginRequest,
            LoginResponse,
            LoginFailure,
            Throttled,
            UserSummary,
            SessionSummary,
            SessionView,
            SessionList,
            RevokeRequest,
            SessionStats,
            DailyStats,
            ActionStats,
            AuditEntry,
            DashboardStats,
        )
    ),
    tags(
        (name = "auth", description = "Login and logout"),
        (name = "sessions", description = "Active session management"),
        (name = "stats", description = "Security overview")
    ),
    security(
        ("session_cookie" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Add the session cookie security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_cookie",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Cookie(
                        utoipa::openapi::security::ApiKeyValue::new(crate::auth::SESSION_COOKIE),
                    ),
                ),
            );
        }
    }
}
