//! Validation route handlers

use crate::error::{validation_error, EngineResult};
use crate::models::{SuccessResponse, ValidateRequest};
use crate::state::SharedState;
use crate::validation::{ArtifactKind, ValidationReport};
use axum::{extract::State, Json};
use validator::Validate;

fn summary(report: &ValidationReport) -> String {
    format!("{} error(s), {} warning(s).", report.errors, report.warnings)
}

pub async fn validate_routes(
    State(state): State<SharedState>,
    Json(payload): Json<ValidateRequest>,
) -> EngineResult<Json<SuccessResponse<ValidationReport>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let report = state
        .engine
        .validate_routes(payload.into_artifacts(ArtifactKind::Route))
        .await?;
    Ok(Json(SuccessResponse::with_data(summary(&report), report)))
}

pub async fn validate_forms(
    State(state): State<SharedState>,
    Json(payload): Json<ValidateRequest>,
) -> EngineResult<Json<SuccessResponse<ValidationReport>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let report = state
        .engine
        .validate_forms(payload.into_artifacts(ArtifactKind::Form))
        .await?;
    Ok(Json(SuccessResponse::with_data(summary(&report), report)))
}
