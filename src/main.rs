mod aggregation;
mod billing;
mod cache_validator;
mod circuit_breaker;
mod config;
mod db;
mod errors;
mod handlers;
mod import;
mod invoice;
mod invoices;
mod mailer;
mod models;
mod months;
mod services;
mod sessions;
mod storage;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::sessions::SessionTracker;

/// Serves the OpenAPI specification YAML file.
///
/// Reads `openapi.yml` from the filesystem and serves it with the right
/// content type; 404 when the file is missing.
async fn serve_openapi_spec() -> impl IntoResponse {
    match tokio::fs::read_to_string("openapi.yml").await {
        Ok(content) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/yaml")],
            content,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "OpenAPI spec not found").into_response(),
    }
}

/// Serves the Swagger UI HTML page, configured to load the spec served by
/// `serve_openapi_spec`.
async fn serve_swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Community Energy API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-standalone-preset.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.yml",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIStandalonePreset
                ],
                layout: "StandaloneLayout"
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

/// Main entry point.
///
/// Initializes tracing, loads configuration (failing closed on anything
/// missing), connects the pool, builds the function clients and caches, and
/// serves the router with rate limiting, body limits, CORS and request
/// tracing.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "community_energy_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; there is no fallback URL/key pair on purpose.
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Import-draft cache (24 hour TTL): replaces the old browser-storage
    // draft persistence with an explicit, invalidatable cache.
    let draft_cache = Cache::builder()
        .time_to_live(Duration::from_secs(86400))
        .max_capacity(1_000)
        .build();
    tracing::info!("Import draft cache initialized (24h TTL)");

    // Transactional-mail function client
    let mailer = match mailer::MailerClient::new(
        config.mailer_base_url.clone(),
        config.mailer_token.clone(),
    ) {
        Ok(client) => {
            tracing::info!("✓ Mailer client initialized: {}", config.mailer_base_url);
            Some(client)
        }
        Err(e) => {
            tracing::error!("Failed to initialize mailer client: {}", e);
            None
        }
    };

    // Privileged user-directory function client
    let directory = match services::DirectoryClient::new(
        config.directory_base_url.clone(),
        config.directory_token.clone(),
    ) {
        Ok(client) => {
            tracing::info!(
                "✓ Directory client initialized: {}",
                config.directory_base_url
            );
            Some(client)
        }
        Err(e) => {
            tracing::error!("Failed to initialize directory client: {}", e);
            None
        }
    };

    // Session inactivity watchdog
    let sessions = Arc::new(SessionTracker::new(config.session_timeout_minutes));
    tracing::info!(
        "Session watchdog initialized ({} min timeout)",
        config.session_timeout_minutes
    );

    // Build application state
    let app_state = Arc::new(handlers::AppState {
        db: db.pool.clone(),
        config: config.clone(),
        mailer,
        directory,
        draft_cache,
        sessions,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        // API Documentation
        .route("/docs", get(serve_swagger_ui))
        .route("/api-docs/openapi.yml", get(serve_openapi_spec))
        // Participants
        .route(
            "/api/v1/participants",
            get(handlers::list_participants).post(handlers::create_participant),
        )
        .route(
            "/api/v1/participants/:id",
            get(handlers::get_participant)
                .put(handlers::update_participant)
                .delete(handlers::delete_participant),
        )
        .route(
            "/api/v1/participants/:id/dashboard",
            get(handlers::get_dashboard),
        )
        .route(
            "/api/v1/participants/:id/network-costs/:month",
            put(handlers::set_network_costs),
        )
        // Simulation calculator
        .route("/api/v1/simulate", post(handlers::simulate))
        // Monthly-data import
        .route("/api/v1/import/template", get(handlers::import_template))
        .route("/api/v1/import/monthly", post(handlers::import_monthly))
        .route("/api/v1/import/draft", post(handlers::save_import_draft))
        .route(
            "/api/v1/import/draft/:key",
            get(handlers::get_import_draft),
        )
        // Invoices
        .route("/api/v1/invoices/preview", post(handlers::invoice_preview))
        .route("/api/v1/invoices/save", post(handlers::invoice_save))
        .route("/api/v1/invoices/bulk", post(handlers::invoice_bulk))
        .route("/api/v1/invoices/email", post(handlers::invoice_email))
        // Admin directory (allowlist-gated)
        .route(
            "/api/v1/admin/users",
            get(handlers::admin_list_users).post(handlers::admin_create_user),
        )
        // Session watchdog
        .route("/api/v1/session/touch", post(handlers::session_touch))
        .route("/api/v1/session/status", get(handlers::session_status))
        .route("/api/v1/session/logout", post(handlers::session_logout))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload (covers import uploads)
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check bypassing rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
