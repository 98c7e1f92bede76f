//! Schema route handlers

use crate::engine::SchemaAnalysis;
use crate::error::{validation_error, EngineResult};
use crate::models::{AnalyzeRequest, SuccessResponse};
use crate::state::SharedState;
use crate::typegen::TypeDefinition;
use axum::{extract::State, Json};
use validator::Validate;

/// Snapshot the live schema
pub async fn analyze_schema(
    State(state): State<SharedState>,
    payload: Option<Json<AnalyzeRequest>>,
) -> EngineResult<Json<SuccessResponse<SchemaAnalysis>>> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let analysis = state.engine.schema_analyze(payload.set_baseline).await?;
    Ok(Json(SuccessResponse::with_data(
        format!(
            "Snapshot v{} stored ({} tables).",
            analysis.snapshot.version, analysis.snapshot.table_count
        ),
        analysis,
    )))
}

pub async fn schema_types(
    State(state): State<SharedState>,
) -> EngineResult<Json<SuccessResponse<Vec<TypeDefinition>>>> {
    let types = state.engine.schema_types().await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} type(s) described.", types.len()),
        types,
    )))
}
