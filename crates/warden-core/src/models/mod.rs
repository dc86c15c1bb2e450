pub mod audit_log;
pub mod rate_limit;
pub mod session;
pub mod user;
