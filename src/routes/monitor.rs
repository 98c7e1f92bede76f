//! Drift monitor route handlers

use crate::engine::MonitorStatus;
use crate::error::{validation_error, EngineResult};
use crate::models::{MonitorStartRequest, SuccessResponse};
use crate::state::SharedState;
use axum::{extract::State, Json};
use std::time::Duration;
use validator::Validate;

pub async fn start_monitor(
    State(state): State<SharedState>,
    payload: Option<Json<MonitorStartRequest>>,
) -> EngineResult<Json<SuccessResponse<MonitorStatus>>> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let status = state
        .engine
        .monitor_start(payload.interval_secs.map(Duration::from_secs))
        .await?;
    Ok(Json(SuccessResponse::with_data("Drift monitor started.", status)))
}

pub async fn stop_monitor(
    State(state): State<SharedState>,
) -> EngineResult<Json<SuccessResponse<MonitorStatus>>> {
    let status = state.engine.monitor_stop().await?;
    Ok(Json(SuccessResponse::with_data("Drift monitor stopped.", status)))
}
