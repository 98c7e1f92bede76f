//! Database connection management
//!
//! Builds the connection pool shared by the analyzer and the migration
//! target. TLS is used when the configuration requires it (managed hosts
//! such as Neon, or `sslmode=require`).

use crate::config::DatabaseConfig;
use crate::error::{EngineError, EngineResult};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Create a connection pool with the given configuration
pub fn create_pool(config: &DatabaseConfig) -> EngineResult<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_pool_size));

    let pool = if config.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
    };

    debug!(
        "Pool for {}@{}:{}/{} (TLS: {})",
        config.user, config.host, config.port, config.database, config.require_tls
    );
    pool.map_err(|e| EngineError::Config(format!("Failed to create pool: {}", e)))
}

/// Fail fast if the database is unreachable
pub async fn verify_connection(pool: &Pool) -> EngineResult<()> {
    let client = pool.get().await?;
    client.query_one("SELECT 1 AS ok", &[]).await?;
    info!("✅ Database connection successful");
    Ok(())
}
