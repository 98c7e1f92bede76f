//! Migration route handlers

use crate::engine::CreatedMigration;
use crate::error::{validation_error, EngineResult};
use crate::migration::{MigrationStatusEntry, RollbackReport, RunReport};
use crate::models::{CreateMigrationRequest, MigrateRequest, RollbackRequest, SuccessResponse};
use crate::state::SharedState;
use axum::{extract::State, Json};
use tracing::info;
use validator::Validate;

/// Apply pending migrations
pub async fn run_migrations(
    State(state): State<SharedState>,
    payload: Option<Json<MigrateRequest>>,
) -> EngineResult<Json<SuccessResponse<RunReport>>> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let report = state.engine.migrate(payload.force, payload.retry_failed).await?;
    info!("Applied {} migration(s)", report.applied.len());

    Ok(Json(SuccessResponse::with_data(
        format!("Applied {} migration(s).", report.applied.len()),
        report,
    )))
}

/// Create an empty SQL migration file
pub async fn create_migration(
    State(state): State<SharedState>,
    Json(payload): Json<CreateMigrationRequest>,
) -> EngineResult<Json<SuccessResponse<CreatedMigration>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let created = state.engine.migrate_create(&payload.name).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Migration {} created.", created.version),
        created,
    )))
}

pub async fn migration_status(
    State(state): State<SharedState>,
) -> EngineResult<Json<SuccessResponse<Vec<MigrationStatusEntry>>>> {
    let entries = state.engine.migrate_status().await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} migration(s) known.", entries.len()),
        entries,
    )))
}

/// Roll back the most recently applied migrations
pub async fn rollback_migrations(
    State(state): State<SharedState>,
    Json(payload): Json<RollbackRequest>,
) -> EngineResult<Json<SuccessResponse<RollbackReport>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let report = state.engine.migrate_rollback(payload.steps).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Rolled back {} migration(s).", report.rolled_back.len()),
        report,
    )))
}
