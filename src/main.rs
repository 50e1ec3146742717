//! osTicket REST API
//!
//! A REST backend over an existing osTicket MySQL database: ticket and user
//! listings, ticket creation, attachments and closing, guarded by osTicket API keys.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use storage::AttachmentStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub storage: Arc<AttachmentStore>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting osTicket API");
    tracing::info!("Database: {:?}", config.database);
    tracing::info!("Attachment storage: {:?}", config.attachments);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.trust_forwarded_for {
        tracing::warn!("Trusting X-Forwarded-For for API key address checks");
    }

    // Initialize database
    let pool = db::init_pool(&config.database).await?;
    let repo = Arc::new(Repository::new(pool));

    let storage = Arc::new(AttachmentStore::new(config.attachments.clone()));

    // Create application state
    let state = AppState {
        repo,
        storage,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API routes
    let api_routes = Router::new()
        // Reference data
        .route("/topics", get(api::list_topics))
        .route("/departments", get(api::list_departments))
        .route("/statuses", get(api::list_statuses))
        // Users
        .route("/users", get(api::list_users))
        .route("/users/{id}", get(api::get_user))
        // Tickets
        .route("/tickets", get(api::list_tickets).post(api::create_ticket))
        .route("/tickets/search", get(api::search_tickets))
        .route("/tickets/{id}", get(api::get_ticket))
        .route("/tickets/{id}/attach", post(api::attach_file))
        .route("/tickets/{id}/close", put(api::close_ticket))
        // Apply API key auth middleware
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::api_key_auth,
        ));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Response {
    match state.repo.ping().await {
        Ok(()) => Json(json!({ "status": "ok", "database": "ok" })).into_response(),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "database": "error",
                    "details": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
