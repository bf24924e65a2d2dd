//! Broker Daemon
//!
//! HTTP process wiring for the generation session broker. The binary builds
//! one backend selection, one generator and one session broker at startup
//! and serves them through [`server::router`].

#![deny(missing_docs)]

pub mod server;

pub use server::{router, serve, AppState, ApiError, GenerateRequest};
