//! Reservation domain for the device-side agent.
//!
//! This crate has no async and no I/O so the transition rules can be
//! exercised directly from unit tests and reused by any front end.

pub mod audit;
pub mod error;
pub mod release;
pub mod state;
pub mod status;
pub mod wire;
