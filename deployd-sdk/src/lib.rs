//! Shared types for the deployd deployment orchestrator.
//!
//! `objects` holds everything that crosses the HTTP boundary. The typed
//! client lives behind the `client` feature.

pub mod objects;

#[cfg(feature = "client")]
pub mod client;
