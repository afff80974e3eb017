#![deny(missing_debug_implementations)]
#![deny(rustdoc::all)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]

//! # gatewarden
//!
//! A persistent multi-session client for a chat platform's real-time
//! gateway: one state machine per WebSocket, a supervisor that owns up to
//! `max_sessions` of them concurrently, and a broadcast hub that fans their
//! status out to subscribers.
//!
//! The gateway client itself ([`gateway`]) never retries; reconnection with
//! bounded backoff is the [`gateway::reconnector::Reconnector`]'s job, driven
//! by the [`gateway::supervisor::Supervisor`]'s watchdog. Persistence and
//! configuration are behind the narrow traits in [`store`] so a binary
//! embedding this crate can back them with whatever it likes.

pub mod config;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod model;
pub mod store;

pub use config::GatewayConfig;
pub use error::Error;
pub use gateway::supervisor::Supervisor;
pub use hub::Hub;
