//! Call log, call trigger and voice gateway webhook endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{CallEvent, CallEventAck, CallLog, CallLogQuery, TriggerCallRequest, TriggeredCall};
use crate::AppState;

/// GET /api/calls - List call logs.
pub async fn list_call_logs(
    State(state): State<AppState>,
    Query(query): Query<CallLogQuery>,
) -> ApiResult<Vec<CallLog>> {
    success(state.repo.list_call_logs(&query).await?)
}

/// GET /api/calls/{id} - Get a call log.
pub async fn get_call_log(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<CallLog> {
    match state.repo.get_call_log(id).await? {
        Some(log) => success(log),
        None => Err(AppError::NotFound(format!("Call log {} not found", id))),
    }
}

/// POST /api/calls/trigger - Call one student now.
pub async fn trigger_call(
    State(state): State<AppState>,
    Json(request): Json<TriggerCallRequest>,
) -> ApiResult<TriggeredCall> {
    success(state.dispatcher.trigger_single(&request).await?)
}

/// POST /api/webhooks/call-events - Event callback from the voice gateway.
pub async fn handle_call_event(
    State(state): State<AppState>,
    Json(event): Json<CallEvent>,
) -> ApiResult<CallEventAck> {
    success(state.dispatcher.handle_event(&event).await?)
}
