use std::net::SocketAddr;

use axum::Router;
use axum::response::IntoResponse;
use axum::routing::get;
use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::config::Config;
use crate::controllers::AppState;
use crate::error::WardenError;
use crate::migrations::Migrator;
use crate::openapi::ApiDoc;
use crate::routing;

const API_DOCS_PATH: &str = "/api-docs";
const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

/// The warden service: a migrated database plus the HTTP surface over it.
pub struct App {
    pub config: Config,
    pub db: DatabaseConnection,
}

impl App {
    /// Create the application from environment configuration.
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::from_env()?;
        Self::with_config(config).await
    }

    /// Create the application with a given config.
    pub async fn with_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let db = crate::db::connect(&config).await?;
        Self::with_db(config, db).await
    }

    /// Create the application over an existing connection. Runs pending
    /// migrations and, when enabled, seeds the demo account.
    pub async fn with_db(
        config: Config,
        db: DatabaseConnection,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        tracing::info!("Running pending database migrations...");
        Migrator::up(&db, None).await?;
        tracing::info!("Migrations complete.");

        if config.seed_demo_user {
            crate::db::seed_demo_user(&db).await?;
        }

        Ok(App { config, db })
    }

    pub fn state(&self) -> Result<AppState, WardenError> {
        AppState::new(self.db.clone(), self.config.clone())
    }

    /// Build the Axum router.
    pub fn router(&self) -> Result<Router, WardenError> {
        let state = self.state()?;

        let mut router = Router::new()
            .route("/", get(welcome))
            .merge(routing::build_routes().with_state(state))
            .merge(Scalar::with_url(API_DOCS_PATH, ApiDoc::openapi()))
            .route(
                OPENAPI_JSON_PATH,
                get(|| async { axum::Json(ApiDoc::openapi()) }),
            )
            .layer(CorsLayer::permissive());

        // Only add tracing/request-id middleware in development mode.
        if self.config.is_dev() {
            use tower_http::LatencyUnit;
            use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse};

            let x_request_id = axum::http::HeaderName::from_static("x-request-id");
            router = router
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(PropagateRequestIdLayer::new(x_request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                        .on_request(DefaultOnRequest::new().level(tracing::Level::INFO))
                        .on_response(
                            DefaultOnResponse::new()
                                .level(tracing::Level::INFO)
                                .latency_unit(LatencyUnit::Millis),
                        ),
                );
        }

        Ok(router)
    }

    /// Serve until Ctrl+C.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.config.server_addr();
        let router = self.router()?;

        println!("\nwarden is running");
        println!("   → Server:   http://{}", addr);
        println!("   → API docs: http://{}{}", addr, API_DOCS_PATH);
        println!();

        tracing::info!(%addr, environment = %self.config.environment, "warden server listening");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down warden server...");
}

#[derive(Serialize)]
struct WelcomeMessage {
    message: &'static str,
    docs: &'static str,
    status: &'static str,
}

async fn welcome() -> impl IntoResponse {
    axum::Json(WelcomeMessage {
        message: "warden session service",
        docs: API_DOCS_PATH,
        status: "running",
    })
}
