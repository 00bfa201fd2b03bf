pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::device;
use crate::state::AppState;

/// Build the agent's control routes.
///
/// ```text
/// GET  /status         -> get_status
/// POST /force-status   -> force_status
/// GET  /audit          -> list_audit
/// ```
pub fn control_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(device::get_status))
        .route("/force-status", post(device::force_status))
        .route("/audit", get(device::list_audit))
}
