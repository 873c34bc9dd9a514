//! Dashboard analytics endpoint.

use axum::extract::State;

use super::{success, ApiResult};
use crate::models::AnalyticsSummary;
use crate::AppState;

/// GET /api/analytics/summary - Aggregate counts across students, calls and campaigns.
pub async fn analytics_summary(State(state): State<AppState>) -> ApiResult<AnalyticsSummary> {
    success(state.repo.analytics_summary().await?)
}
