//! SchemaFlow Engine server
//!
//! Exposes the engine verbs over HTTP. Migrations, drift checks and the
//! drift monitor all run against the database configured in the environment.

use schemaflow_engine::config::Settings;
use schemaflow_engine::routes::create_router;
use schemaflow_engine::state::AppState;
use schemaflow_engine::{db, Engine};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting SchemaFlow Engine...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let pool = db::create_pool(&settings.database)?;
    if let Err(e) = db::verify_connection(&pool).await {
        error!("❌ FATAL: Database is not reachable: {}", e);
        return Err(e.into());
    }

    let engine = Engine::open(&settings, pool).await?;
    let state = Arc::new(AppState::new(engine, settings.clone()));

    if settings.monitoring.enabled {
        match state.engine.monitor_start(None).await {
            Ok(_) => info!("🔭 Drift monitor enabled"),
            Err(e) => warn!("⚠️  Drift monitor not started: {}", e),
        }
    }

    // Build the router
    let app = create_router(state.clone(), &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Migrations ───");
    info!("   POST /api/migrate              - Apply pending migrations");
    info!("   POST /api/migrate/create       - Create an empty SQL migration");
    info!("   GET  /api/migrate/status       - Files and ledger, per version");
    info!("   POST /api/migrate/rollback     - Roll back the last N migrations");
    info!("");
    info!("   ─── Drift ───");
    info!("   GET  /api/drift                - Compare live schema to baseline");
    info!("   POST /api/drift/fix            - Generate migrations restoring baseline");
    info!("   POST /api/schema/analyze       - Snapshot the live schema");
    info!("   GET  /api/schema/types         - Type descriptions per table");
    info!("");
    info!("   ─── Validation & Monitoring ───");
    info!("   POST /api/validate/routes      - Check routes against the schema");
    info!("   POST /api/validate/forms       - Check forms against the schema");
    info!("   POST /api/monitor/start        - Start the drift monitor");
    info!("   POST /api/monitor/stop         - Stop the drift monitor");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = state.engine.shutdown().await {
        warn!("⚠️  Engine shutdown: {}", e);
    }

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing; `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,schemaflow_engine=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
