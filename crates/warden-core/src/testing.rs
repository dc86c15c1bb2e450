//! Test harness: a live server on an ephemeral port over in-memory SQLite,
//! plus a cookie-keeping HTTP client.
//!
//! ```rust,ignore
//! use warden_core::testing::TestApp;
//!
//! #[tokio::test]
//! async fn login_works() {
//!     let app = TestApp::new().await;
//!     let res = app.login(&app.client, "admin", "admin123").await;
//!     assert_eq!(res.status, 200);
//! }
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::HeaderMap;
use reqwest::cookie::{CookieStore, Jar};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tokio::net::TcpListener;

use crate::auth::{SESSION_COOKIE, SessionContext, hash_password};
use crate::config::{Config, SecurityConfig};
use crate::controllers::AppState;
use crate::models::user;

/// Configuration for tests: in-memory store, demo user seeded, a fresh
/// audit file under the temp dir, and no random cleanup passes.
pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        environment: "test".to_string(),
        session_secret: "test-session-secret".to_string(),
        audit_log_path: Some(temp_audit_path()),
        seed_demo_user: true,
        security: SecurityConfig {
            session_cleanup_probability: 0.0,
            ..SecurityConfig::default()
        },
    }
}

/// [`test_config`] over a SQLite file in `dir`, with the regular connection
/// pool, so concurrent callers really run on separate connections.
pub fn file_db_config(dir: &Path) -> Config {
    Config {
        database_url: format!("sqlite://{}?mode=rwc", dir.join("warden.db").display()),
        ..test_config()
    }
}

/// A unique audit file path that does not exist yet.
pub fn temp_audit_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("warden-test-{}", uuid::Uuid::new_v4()))
        .join("security.log")
}

/// Migrated and seeded in-memory database for component tests.
pub async fn setup_db() -> DatabaseConnection {
    let app = crate::App::with_config(test_config())
        .await
        .expect("Failed to set up test database");
    app.db
}

/// Migrated and seeded file-backed database under `dir`.
pub async fn setup_file_db(dir: &Path) -> DatabaseConnection {
    let app = crate::App::with_config(file_db_config(dir))
        .await
        .expect("Failed to set up file database");
    app.db
}

/// Migrated in-memory database plus the wired components.
pub async fn setup_state(config: Config) -> AppState {
    let app = crate::App::with_config(config)
        .await
        .expect("Failed to set up test database");
    app.state().expect("Failed to build app state")
}

/// Insert a user directly, bypassing any API.
pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    email: &str,
    password: &str,
) -> user::Model {
    user::ActiveModel {
        username: Set(username.to_string()),
        email: Set(email.to_string()),
        password_hash: Set(hash_password(password).expect("Failed to hash password")),
        is_active: Set(true),
        created_at: Set(chrono::Utc::now().naive_utc()),
        last_login: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create user")
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub client: TestClient,
    pub db: DatabaseConnection,
    pub config: Config,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let app = crate::App::with_config(config)
            .await
            .expect("Failed to create test app");

        let state = app.state().expect("Failed to build app state");
        let router = app.router().expect("Failed to build router");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("Failed to get local addr");

        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Test server failed");
        });

        TestApp {
            addr,
            client: TestClient::new(addr),
            db: app.db,
            config: app.config,
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Another client with its own cookie jar, as a second browser would be.
    pub fn new_client(&self) -> TestClient {
        TestClient::new(self.addr)
    }

    pub async fn login(&self, client: &TestClient, username: &str, password: &str) -> TestResponse {
        let body = serde_json::json!({
            "username": username,
            "password": password,
        });
        client.post("/api/auth/login", &body).await
    }

    /// Decode the session context held in `client`'s cookie jar.
    pub fn context_of(&self, client: &TestClient) -> SessionContext {
        client
            .cookie(SESSION_COOKIE)
            .map(|value| self.state.codec.decode(&value))
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct TestClient {
    inner: reqwest::Client,
    jar: Arc<Jar>,
    base_addr: SocketAddr,
}

impl TestClient {
    pub fn new(addr: SocketAddr) -> Self {
        let jar = Arc::new(Jar::default());
        let inner = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build HTTP client");
        TestClient {
            inner,
            jar,
            base_addr: addr,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.base_addr)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .inner
            .get(self.url(path))
            .send()
            .await
            .expect("GET request failed");
        TestResponse::from_response(res).await
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> TestResponse {
        let res = self
            .inner
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("POST request failed");
        TestResponse::from_response(res).await
    }

    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let res = self
            .inner
            .post(self.url(path))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("POST request failed");
        TestResponse::from_response(res).await
    }

    /// Current value of a cookie in the jar.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let url: reqwest::Url = self.base_url().parse().expect("Invalid base URL");
        let header = self.jar.cookies(&url)?;
        header
            .to_str()
            .ok()?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub body: String,
    pub headers: HeaderMap,
}

impl TestResponse {
    async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let body = res.text().await.unwrap_or_default();
        TestResponse {
            status,
            body,
            headers,
        }
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("Failed to parse response as JSON")
    }

    pub fn is_success(&self) -> bool {
        self.json()["success"].as_bool().unwrap_or(false)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
