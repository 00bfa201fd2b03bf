//! Shared helpers for agent integration tests.
//!
//! - [`RecordingAuthority`]: in-memory [`Authority`] that records pushes and
//!   notifications and serves whatever status/commands the test sets.
//! - [`FakeAuthorityServer`]: the same ledger behind real HTTP endpoints,
//!   for exercising [`HttpAuthority`](iotm_agent::authority::HttpAuthority).

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{self, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use iotm_agent::agent::Agent;
use iotm_agent::authority::{Authority, AuthorityError};
use iotm_agent::config::AgentConfig;
use iotm_agent::server::build_app;
use iotm_agent::state::AppState;
use iotm_core::status::ReservationStatus;
use iotm_core::wire::{
    AutoReleaseNotice, CommandKind, DeviceCommand, RemoteReserveDetails, RemoteStatus,
    StatusReport,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const RESOURCE_ID: &str = "lab-01";

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// What the fake authority knows and what it has been told.
#[derive(Debug, Default)]
pub struct Ledger {
    /// `None` means the resource is unknown (404).
    pub remote: Option<RemoteStatus>,
    pub reserve_command: Option<DeviceCommand>,
    pub release_command: Option<DeviceCommand>,
    pub pushes: Vec<StatusReport>,
    pub notices: Vec<AutoReleaseNotice>,
    /// Every call fails with 503 while set.
    pub offline: bool,
    /// Status pushes fail with 500 while set; reads keep working.
    pub reject_pushes: bool,
}

/// Handle to a ledger shared between the test and a fake authority.
#[derive(Debug, Clone, Default)]
pub struct LedgerHandle(Arc<Mutex<Ledger>>);

impl LedgerHandle {
    pub fn with<R>(&self, f: impl FnOnce(&mut Ledger) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }

    pub fn set_remote(&self, status: ReservationStatus) {
        self.with(|l| {
            l.remote = Some(RemoteStatus {
                resource_id: Some(RESOURCE_ID.to_string()),
                status,
                reserve_details: None,
            })
        });
    }

    pub fn set_remote_reserved(&self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.with(|l| {
            l.remote = Some(RemoteStatus {
                resource_id: Some(RESOURCE_ID.to_string()),
                status: ReservationStatus::Reserved,
                reserve_details: Some(RemoteReserveDetails {
                    user_id: Some("alice".to_string()),
                    start_time: Some(start),
                    predicted_end_time: Some(end),
                }),
            })
        });
    }

    pub fn set_offline(&self, offline: bool) {
        self.with(|l| l.offline = offline);
    }

    pub fn set_reject_pushes(&self, reject: bool) {
        self.with(|l| l.reject_pushes = reject);
    }

    /// Put a command into a slot; it is handed out once.
    pub fn queue_command(&self, kind: CommandKind, command: &str) {
        let cmd = DeviceCommand {
            resource_id: Some(RESOURCE_ID.to_string()),
            command: command.to_string(),
            message: None,
        };
        self.with(|l| match kind {
            CommandKind::Reserve => l.reserve_command = Some(cmd),
            CommandKind::Release => l.release_command = Some(cmd),
        });
    }

    pub fn pushes(&self) -> Vec<StatusReport> {
        self.with(|l| l.pushes.clone())
    }

    pub fn notices(&self) -> Vec<AutoReleaseNotice> {
        self.with(|l| l.notices.clone())
    }

    /// Whether any push so far reported `status`.
    pub fn pushed(&self, status: ReservationStatus) -> bool {
        self.with(|l| l.pushes.iter().any(|p| p.status == status))
    }

    pub fn last_push_status(&self) -> Option<ReservationStatus> {
        self.with(|l| l.pushes.last().map(|p| p.status))
    }

    fn take_command(&self, kind: CommandKind) -> Option<DeviceCommand> {
        self.with(|l| match kind {
            CommandKind::Reserve => l.reserve_command.take(),
            CommandKind::Release => l.release_command.take(),
        })
    }

    fn is_offline(&self) -> bool {
        self.with(|l| l.offline)
    }
}

// ---------------------------------------------------------------------------
// In-memory authority
// ---------------------------------------------------------------------------

/// [`Authority`] backed directly by a [`LedgerHandle`].
///
/// Pushes are recorded but never change `remote`, so the read path lags
/// behind the agent exactly like a slow authority would.
#[derive(Debug, Clone, Default)]
pub struct RecordingAuthority {
    pub ledger: LedgerHandle,
}

fn offline_error() -> AuthorityError {
    AuthorityError::Api {
        status: 503,
        body: "offline".to_string(),
    }
}

#[async_trait]
impl Authority for RecordingAuthority {
    async fn push_status(&self, report: &StatusReport) -> Result<(), AuthorityError> {
        if self.ledger.is_offline() {
            return Err(offline_error());
        }
        if self.ledger.with(|l| l.reject_pushes) {
            return Err(AuthorityError::Api {
                status: 500,
                body: "push rejected".to_string(),
            });
        }
        self.ledger.with(|l| l.pushes.push(report.clone()));
        Ok(())
    }

    async fn fetch_status(
        &self,
        _resource_id: &str,
    ) -> Result<Option<RemoteStatus>, AuthorityError> {
        if self.ledger.is_offline() {
            return Err(offline_error());
        }
        Ok(self.ledger.with(|l| l.remote.clone()))
    }

    async fn fetch_command(
        &self,
        _resource_id: &str,
        kind: CommandKind,
    ) -> Result<Option<DeviceCommand>, AuthorityError> {
        if self.ledger.is_offline() {
            return Err(offline_error());
        }
        Ok(self.ledger.take_command(kind))
    }

    async fn notify_auto_release(
        &self,
        _resource_id: &str,
        notice: &AutoReleaseNotice,
    ) -> Result<(), AuthorityError> {
        if self.ledger.is_offline() {
            return Err(offline_error());
        }
        self.ledger.with(|l| l.notices.push(notice.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Agent helpers
// ---------------------------------------------------------------------------

/// Config with test-friendly values; the authority URL is never dialled
/// by the in-memory authority.
pub fn test_config() -> AgentConfig {
    let mut config = AgentConfig::new(RESOURCE_ID, "http://127.0.0.1:9");
    config.status_interval = Duration::from_secs(30);
    config.check_interval = Duration::from_secs(15);
    config
}

/// Build an agent wired to a fresh [`RecordingAuthority`].
pub fn test_agent(config: AgentConfig) -> (Arc<Agent>, LedgerHandle) {
    let authority = RecordingAuthority::default();
    let ledger = authority.ledger.clone();
    (Agent::new(config, Arc::new(authority)), ledger)
}

/// Poll `check` until it holds or the wait times out.
pub async fn wait_for(check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll the agent until it reaches `status` or the wait times out.
pub async fn wait_for_status(agent: &Agent, status: ReservationStatus) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if agent.status().await == status {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Cancel the agent's periodic tasks and wait for them to finish.
pub async fn stop(agent: &Agent, cancel: CancellationToken, tasks: Vec<JoinHandle<()>>) {
    cancel.cancel();
    for task in tasks {
        tokio::time::timeout(WAIT_TIMEOUT, task)
            .await
            .unwrap()
            .unwrap();
    }
    agent.shutdown().await;
}

// ---------------------------------------------------------------------------
// Fake authority over HTTP
// ---------------------------------------------------------------------------

/// A running fake authority on an ephemeral local port.
pub struct FakeAuthorityServer {
    pub base_url: String,
    pub ledger: LedgerHandle,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for FakeAuthorityServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl FakeAuthorityServer {
    pub async fn start() -> Self {
        let ledger = LedgerHandle::default();
        let app = Router::new()
            .route("/api/v1/devices/status", post(push_status))
            .route(
                "/api/v1/devices/{resource_id}/status",
                routing::get(get_status),
            )
            .route(
                "/api/v1/devices/{resource_id}/commands/{kind}",
                routing::get(get_command),
            )
            .route(
                "/api/v1/devices/{resource_id}/auto-release",
                post(auto_release),
            )
            .with_state(ledger.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            ledger,
            handle,
        }
    }
}

async fn push_status(
    State(ledger): State<LedgerHandle>,
    Json(report): Json<StatusReport>,
) -> Response {
    if ledger.is_offline() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ledger.with(|l| l.pushes.push(report));
    StatusCode::OK.into_response()
}

async fn get_status(
    State(ledger): State<LedgerHandle>,
    Path(resource_id): Path<String>,
) -> Response {
    if ledger.is_offline() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match ledger.with(|l| l.remote.clone()) {
        Some(remote) if resource_id == RESOURCE_ID => Json(remote).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_command(
    State(ledger): State<LedgerHandle>,
    Path((_resource_id, kind)): Path<(String, String)>,
) -> Response {
    if ledger.is_offline() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let kind = match kind.as_str() {
        "reserve" => CommandKind::Reserve,
        "release" => CommandKind::Release,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    match ledger.take_command(kind) {
        Some(cmd) => Json(cmd).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn auto_release(
    State(ledger): State<LedgerHandle>,
    Path(_resource_id): Path<String>,
    Json(notice): Json<AutoReleaseNotice>,
) -> Response {
    if ledger.is_offline() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ledger.with(|l| l.notices.push(notice));
    StatusCode::OK.into_response()
}

// ---------------------------------------------------------------------------
// Control surface helpers
// ---------------------------------------------------------------------------

/// The full control surface router for `agent`, middleware included.
pub fn build_test_app(agent: Arc<Agent>) -> Router {
    build_app(AppState { agent })
}

/// Send a GET request through the router.
pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a POST request with a JSON body through the router.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
