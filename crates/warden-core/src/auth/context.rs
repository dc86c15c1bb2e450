//! Request-scoped session context.
//!
//! The context is the client-held half of a session: the token, who it
//! belongs to, and when the client was last seen. It travels in a signed
//! cookie, so nothing about it is shared between concurrent requests on the
//! server side. The durable half lives in the `sessions` table.

use axum::http::{HeaderMap, header};
use chrono::NaiveDateTime;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::WardenError;

pub const SESSION_COOKIE: &str = "warden_session";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ContextState {
    token: String,
    user_id: i32,
    username: String,
    last_activity: NaiveDateTime,
}

/// Session state for the request being handled.
///
/// Empty until a session is created or a valid cookie is decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    state: Option<ContextState>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the context to a freshly created session.
    pub fn establish(
        &mut self,
        token: impl Into<String>,
        user_id: i32,
        username: impl Into<String>,
        now: NaiveDateTime,
    ) {
        self.state = Some(ContextState {
            token: token.into(),
            user_id,
            username: username.into(),
            last_activity: now,
        });
    }

    /// Move the last-activity marker. No-op on an empty context.
    pub fn touch(&mut self, at: NaiveDateTime) {
        if let Some(state) = self.state.as_mut() {
            state.last_activity = at;
        }
    }

    pub fn clear(&mut self) {
        self.state = None;
    }

    pub fn is_established(&self) -> bool {
        self.state.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.token.as_str())
    }

    pub fn user_id(&self) -> Option<i32> {
        self.state.as_ref().map(|s| s.user_id)
    }

    pub fn username(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.username.as_str())
    }

    pub fn last_activity(&self) -> Option<NaiveDateTime> {
        self.state.as_ref().map(|s| s.last_activity)
    }
}

/// Signs and verifies the session cookie.
#[derive(Clone)]
pub struct ContextCodec {
    mac: HmacSha256,
    max_age_secs: u64,
    secure: bool,
}

impl ContextCodec {
    pub fn new(secret: &str, max_age_secs: u64, secure: bool) -> Result<Self, WardenError> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| WardenError::Internal(format!("Invalid session secret: {}", e)))?;
        Ok(Self {
            mac,
            max_age_secs,
            secure,
        })
    }

    /// Serialize and sign a context as `<hex payload>.<hex mac>`.
    /// An empty context encodes to an empty string.
    pub fn encode(&self, ctx: &SessionContext) -> String {
        let Some(state) = ctx.state.as_ref() else {
            return String::new();
        };
        let payload = match serde_json::to_vec(state) {
            Ok(bytes) => hex::encode(bytes),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize session context");
                return String::new();
            }
        };
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        format!("{}.{}", payload, hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify and decode a cookie value. Anything unsigned, tampered or
    /// malformed yields an empty context.
    pub fn decode(&self, value: &str) -> SessionContext {
        let Some((payload, signature)) = value.split_once('.') else {
            return SessionContext::default();
        };
        let Ok(signature) = hex::decode(signature) else {
            return SessionContext::default();
        };

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            tracing::warn!("session cookie failed signature check");
            return SessionContext::default();
        }

        let state = hex::decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<ContextState>(&bytes).ok());
        SessionContext { state }
    }

    /// Decode the context carried by the request's cookies.
    pub fn from_headers(&self, headers: &HeaderMap) -> SessionContext {
        read_cookie(headers, SESSION_COOKIE)
            .map(|value| self.decode(value))
            .unwrap_or_default()
    }

    /// `Set-Cookie` value that stores `ctx`, or expires the cookie when the
    /// context is empty.
    pub fn set_cookie(&self, ctx: &SessionContext) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        if ctx.is_established() {
            format!(
                "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}{}",
                SESSION_COOKIE,
                self.encode(ctx),
                self.max_age_secs,
                secure
            )
        } else {
            format!(
                "{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0{}",
                SESSION_COOKIE, secure
            )
        }
    }
}

fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}
