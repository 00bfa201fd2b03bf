use std::sync::Arc;

use crate::agent::Agent;

/// Shared state available to all control surface handlers via
/// `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// The agent this process serves.
    pub agent: Arc<Agent>,
}
