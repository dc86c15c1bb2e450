use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

const DEV_SESSION_SECRET: &str = "warden-dev-secret-change-me";

/// Upper bound for every configured duration (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Who may revoke a session by token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationPolicy {
    /// Only sessions owned by the acting user can be revoked.
    Owner,
    /// Any authenticated caller can revoke any session token.
    Any,
}

impl FromStr for RevocationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "owner" => Ok(RevocationPolicy::Owner),
            "any" => Ok(RevocationPolicy::Any),
            other => Err(format!("unknown revocation policy: {other}")),
        }
    }
}

/// Session, throttle and cleanup policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Inactivity timeout and lifetime of a session (default: 1800).
    pub session_timeout_secs: u64,

    /// Login attempts allowed per address inside the window (default: 5).
    pub max_login_attempts: u32,

    /// Counting window for login attempts (default: 300).
    pub rate_limit_window_secs: u64,

    /// How long an address stays blocked once it hits the ceiling (default: 900).
    pub block_duration_secs: u64,

    /// Chance that a session validation also sweeps expired sessions (default: 0.1).
    pub session_cleanup_probability: f64,

    /// Ownership rule for session revocation (default: owner).
    pub revocation_policy: RevocationPolicy,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 1800,
            max_login_attempts: 5,
            rate_limit_window_secs: 300,
            block_duration_secs: 900,
            session_cleanup_probability: 0.1,
            revocation_policy: RevocationPolicy::Owner,
        }
    }
}

impl SecurityConfig {
    /// Load overrides from the environment, keeping defaults for anything
    /// missing or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_timeout_secs: env_or("SESSION_TIMEOUT_SECS", defaults.session_timeout_secs),
            max_login_attempts: env_or("MAX_LOGIN_ATTEMPTS", defaults.max_login_attempts),
            rate_limit_window_secs: env_or(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window_secs,
            ),
            block_duration_secs: env_or("BLOCK_DURATION_SECS", defaults.block_duration_secs),
            session_cleanup_probability: env_or(
                "SESSION_CLEANUP_PROBABILITY",
                defaults.session_cleanup_probability,
            )
            .clamp(0.0, 1.0),
            revocation_policy: env_or("SESSION_REVOKE_POLICY", defaults.revocation_policy),
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database connection URL (e.g. sqlite://warden.db?mode=rwc, postgres://...)
    pub database_url: String,

    /// Server host (default: 127.0.0.1)
    pub server_host: String,

    /// Server port (default: 3000)
    pub server_port: u16,

    /// Environment: development, production, test
    pub environment: String,

    /// Key that signs the session context cookie.
    pub session_secret: String,

    /// Append-only secondary audit log. `None` disables it.
    pub audit_log_path: Option<PathBuf>,

    /// Insert the `admin` / `admin123` demo account on startup.
    pub seed_demo_user: bool,

    pub security: SecurityConfig,
}

impl Config {
    /// Load configuration from environment variables (with .env support).
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if present (ignore errors if missing)
        let _ = dotenvy::dotenv();

        let audit_log_path = match std::env::var("AUDIT_LOG_PATH") {
            Ok(path) if path.trim().is_empty() || path.eq_ignore_ascii_case("off") => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => Some(PathBuf::from("logs/security.log")),
        };

        let config = Config {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://warden.db?mode=rwc".to_string()),
            server_host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env_or("SERVER_PORT", 3000),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            session_secret: std::env::var("SESSION_SECRET")
                .unwrap_or_else(|_| DEV_SESSION_SECRET.to_string()),
            audit_log_path,
            seed_demo_user: env_flag("SEED_DEMO_USER"),
            security: SecurityConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that are unsafe to run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_production() && self.session_secret == DEV_SESSION_SECRET {
            return Err("SESSION_SECRET must be set in production".to_string());
        }
        if self.session_secret.is_empty() {
            return Err("SESSION_SECRET must not be empty".to_string());
        }
        if self.security.max_login_attempts == 0 {
            return Err("MAX_LOGIN_ATTEMPTS must be at least 1".to_string());
        }
        for (key, secs) in [
            ("SESSION_TIMEOUT_SECS", self.security.session_timeout_secs),
            ("RATE_LIMIT_WINDOW_SECS", self.security.rate_limit_window_secs),
            ("BLOCK_DURATION_SECS", self.security.block_duration_secs),
        ] {
            if secs == 0 || secs > MAX_DURATION_SECS {
                return Err(format!(
                    "{key} must be between 1 and {MAX_DURATION_SECS} seconds, got {secs}"
                ));
            }
        }
        Ok(())
    }

    /// Check if running in development mode.
    pub fn is_dev(&self) -> bool {
        self.environment == "development"
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Get the full server address.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revocation_policy_parses_case_insensitively() {
        assert_eq!("Owner".parse::<RevocationPolicy>(), Ok(RevocationPolicy::Owner));
        assert_eq!(" any ".parse::<RevocationPolicy>(), Ok(RevocationPolicy::Any));
        assert!("admin".parse::<RevocationPolicy>().is_err());
    }
}
