// handlers/public/health.rs - GET /health and GET /health/:name

use axum::{
    extract::{Path, State},
    http::StatusCode,
};

use crate::app::AppState;
use crate::diagnostics::{DiagnosticReport, ServiceState, ServiceStatus};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};

/// GET /health - Overall status plus one record per registered service
///
/// Responds 503 when any service is unavailable so load balancers can act on
/// the status code alone.
pub async fn health_report(State(state): State<AppState>) -> ApiResponse<DiagnosticReport> {
    let report = state.diagnostics.report().await;
    let status_code = match report.status {
        ServiceState::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ServiceState::Ready | ServiceState::Degraded => StatusCode::OK,
    };
    ApiResponse::with_status(report, status_code)
}

/// GET /health/:name - Status of a single registered service
pub async fn service_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ServiceStatus> {
    let status = state
        .diagnostics
        .status_of(&name)
        .await
        .ok_or_else(|| ApiError::not_found(format!("No diagnostic provider named '{}'", name)))?;
    Ok(ApiResponse::success(status))
}
