//! Inspection and administration of the local agent.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use iotm_core::audit::AuditEntry;
use iotm_core::status::ReservationStatus;
use serde::{Deserialize, Serialize};

use crate::agent::AgentSnapshot;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Response of `GET /status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub resource_id: String,
    pub current_status: AgentSnapshot,
    /// Seconds since the agent started.
    pub uptime: f64,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /force-status`.
#[derive(Debug, Deserialize)]
pub struct ForceStatusRequest {
    #[serde(default)]
    pub status: Option<String>,
}

/// Response of `POST /force-status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceStatusResponse {
    pub message: String,
    pub status: ReservationStatus,
    /// `false` when the agent was already in the requested status.
    pub applied: bool,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /status
///
/// Pure read of the agent's current state.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let agent = &state.agent;
    Json(StatusResponse {
        resource_id: agent.resource_id().to_string(),
        current_status: agent.snapshot().await,
        uptime: agent.uptime().as_secs_f64(),
        timestamp: Utc::now(),
    })
}

/// POST /force-status
///
/// Set the status directly, bypassing the authority. Intended for testing
/// and administration.
pub async fn force_status(
    State(state): State<AppState>,
    Json(input): Json<ForceStatusRequest>,
) -> AppResult<Json<ForceStatusResponse>> {
    let raw = input
        .status
        .ok_or_else(|| AppError::BadRequest("status is required".to_string()))?;
    let status: ReservationStatus = raw.parse()?;

    let outcome = state.agent.force_status(status).await;

    let message = if outcome.applied {
        format!("Status forced to {status}")
    } else {
        format!("Status already {status}")
    };

    Ok(Json(ForceStatusResponse {
        message,
        status: outcome.to,
        applied: outcome.applied,
        timestamp: Utc::now(),
    }))
}

/// GET /audit
///
/// Recent status transitions, oldest first.
pub async fn list_audit(State(state): State<AppState>) -> Json<DataResponse<Vec<AuditEntry>>> {
    Json(DataResponse {
        data: state.agent.audit_log().await,
    })
}
