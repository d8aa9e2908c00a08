//! Core domain + application logic for the channel relay.
//!
//! This crate is intentionally framework-agnostic. The Telegram transport
//! lives behind a port (trait) implemented in the adapter crate; everything
//! here (identifier resolution, the ingestion buffer, post transformation,
//! delivery, pacing, stats) is plain async Rust that can be tested with an
//! in-memory transport.

pub mod config;
pub mod delivery;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod events;
pub mod logging;
pub mod message;
pub mod port;
pub mod resolver;
pub mod stats;
pub mod store;
pub mod transform;

pub use errors::{Error, Result};
