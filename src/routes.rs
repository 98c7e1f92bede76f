//! Route definitions and router setup
//!
//! Configures all API routes and middleware. Every engine verb is a JSON
//! endpoint under `/api`.

mod drift;
mod migrate;
mod monitor;
mod schema;
mod validate;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    // Build the router
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Migrations
        .route("/api/migrate", post(migrate::run_migrations))
        .route("/api/migrate/create", post(migrate::create_migration))
        .route("/api/migrate/status", get(migrate::migration_status))
        .route("/api/migrate/rollback", post(migrate::rollback_migrations))

        // Drift
        .route("/api/drift", get(drift::check_drift))
        .route("/api/drift/fix", post(drift::fix_drift))

        // Schema
        .route("/api/schema/analyze", post(schema::analyze_schema))
        .route("/api/schema/types", get(schema::schema_types))

        // Validation
        .route("/api/validate/routes", post(validate::validate_routes))
        .route("/api/validate/forms", post(validate::validate_forms))

        // Monitor
        .route("/api/monitor/start", post(monitor::start_monitor))
        .route("/api/monitor/stop", post(monitor::stop_monitor))

        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// CORS for the configured origins; any origin when none parse
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Engine is running.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
