//! The model module contains the data types shared between the gateway
//! client, the supervisor and the stores it is wired to.

pub mod config;
pub mod log;
pub mod server;
pub mod status;

pub use config::Configuration;
pub use log::{LogEntry, LogLevel};
pub use server::ServerEntry;
pub use status::{ConnectionStatus, SessionResume, SessionState};
