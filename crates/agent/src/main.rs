//! `iotm-agent` -- device-side reservation agent.
//!
//! Represents one resource: keeps its reservation state, pushes it to the
//! authority, reconciles against the authority, and releases on its own
//! when the reservation deadline passes. Exposes a small HTTP surface for
//! inspection and forced status changes.
//!
//! See [`iotm_agent::config`] for the environment variables.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use iotm_agent::agent::Agent;
use iotm_agent::authority::HttpAuthority;
use iotm_agent::config::AgentConfig;
use iotm_agent::server;
use iotm_agent::state::AppState;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long each periodic task gets to stop after cancellation.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iotm_agent=info,audit=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = AgentConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        resource_id = %config.resource_id,
        backend_url = %config.backend_url,
        status_interval_secs = config.status_interval.as_secs(),
        check_interval_secs = config.check_interval.as_secs(),
        timeout_minutes = config.hold_duration.num_minutes(),
        strategy = ?config.strategy,
        auto_release = config.auto_release.enabled,
        port = config.port,
        "Starting iotm-agent",
    );

    // --- Authority client ---
    let authority = HttpAuthority::new(&config.backend_url).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to create authority client");
        std::process::exit(1);
    });

    let host: IpAddr = config.host.parse().unwrap_or_else(|e| {
        tracing::error!(host = %config.host, error = %e, "Invalid HOST address");
        std::process::exit(1);
    });
    let addr = SocketAddr::new(host, config.port);

    // --- Agent ---
    let agent = Agent::new(config, Arc::new(authority));
    let cancel = CancellationToken::new();

    // --- Control surface ---
    let app = server::build_app(AppState {
        agent: Arc::clone(&agent),
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(%addr, error = %e, "Failed to bind control surface");
            std::process::exit(1);
        });
    tracing::info!(%addr, "Control surface listening");

    let tasks = agent.start(&cancel);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Control surface error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Stopping periodic tasks");
    cancel.cancel();
    for task in tasks {
        let _ = tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await;
    }
    agent.shutdown().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
