//! Request handlers for the agent's control surface.
//!
//! Handlers only read snapshots or call the agent's transition operations;
//! none of them touch reservation state directly.

pub mod device;
