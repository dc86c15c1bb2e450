use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};

use crate::auth::{ActiveSession, ClientInfo, SessionContext};
use crate::controllers::{AppState, context_cookie};
use crate::error::WardenError;

/// The session context carried by the request cookie, unvalidated.
///
/// A missing, unsigned or tampered cookie yields an empty context.
pub struct CurrentContext(pub SessionContext);

impl FromRequestParts<AppState> for CurrentContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(CurrentContext(state.codec.from_headers(&parts.headers)))
    }
}

/// A caller whose session passed validation.
///
/// Handlers must send `context` back (see [`context_cookie`]) so the
/// refreshed activity marker reaches the client.
///
/// Rejects with 401 and a cookie that clears the dead context.
pub struct Authenticated {
    pub context: SessionContext,
    pub client: ClientInfo,
    pub active: ActiveSession,
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Ok(client) = ClientInfo::from_request_parts(parts, state).await;
        let mut context = state.codec.from_headers(&parts.headers);

        match state.sessions.validate_session(&mut context, &client).await {
            Some(active) => Ok(Authenticated {
                context,
                client,
                active,
            }),
            None => Err((
                context_cookie(&state.codec, &context),
                WardenError::unauthorized("Unauthorized"),
            )
                .into_response()),
        }
    }
}
