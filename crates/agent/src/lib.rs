//! `iotm-agent` library crate.
//!
//! The device-side reservation agent: one [`Agent`](agent::Agent) per
//! resource keeps a local view of the reservation, reports it to the
//! authority, reconciles against the authority, and releases on its own
//! when the deadline passes. The binary entrypoint lives in `main.rs`; the
//! modules are public so integration tests can drive them.

pub mod agent;
pub mod authority;
pub mod config;
pub mod error;
pub mod handlers;
pub mod reconciler;
pub mod release;
pub mod reporter;
pub mod response;
pub mod routes;
pub mod scheduler;
pub mod server;
pub mod state;
