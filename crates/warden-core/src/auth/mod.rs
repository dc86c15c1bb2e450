pub mod audit;
pub mod client;
pub mod context;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod token;

pub use audit::{AuditAction, AuditEntry, AuditLog, DailyStats};
pub use client::ClientInfo;
pub use context::{ContextCodec, SESSION_COOKIE, SessionContext};
pub use password::{hash_password, verify_password};
pub use rate_limit::{ActionStats, AttemptDecision, LOGIN_ATTEMPT, RateLimiter};
pub use session::{ActiveSession, SessionManager, SessionStats, SessionSummary};
pub use token::{generate_session_token, token_fingerprint};
