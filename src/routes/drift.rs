//! Drift route handlers

use crate::drift::DriftReport;
use crate::engine::DriftFix;
use crate::error::{validation_error, EngineResult};
use crate::models::{DriftFixRequest, SuccessResponse};
use crate::state::SharedState;
use axum::{extract::State, Json};
use validator::Validate;

/// Compare the live schema against the baseline
pub async fn check_drift(
    State(state): State<SharedState>,
) -> EngineResult<Json<SuccessResponse<DriftReport>>> {
    let report = state.engine.drift_check().await?;
    let message = if report.has_drift {
        format!("{} change(s) since baseline v{}.", report.changes.len(), report.baseline_version)
    } else {
        "No drift detected.".to_string()
    };
    Ok(Json(SuccessResponse::with_data(message, report)))
}

/// Generate migrations that restore the baseline
pub async fn fix_drift(
    State(state): State<SharedState>,
    payload: Option<Json<DriftFixRequest>>,
) -> EngineResult<Json<SuccessResponse<DriftFix>>> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let fix = state.engine.drift_fix(payload.apply).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Generated {} migration(s).", fix.migrations.len()),
        fix,
    )))
}
