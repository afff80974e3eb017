//! Everything needed to hold open one gateway WebSocket and keep it alive:
//! the wire schema, the transport, the per-session state machine, and the
//! reconnect policy that drives it after a disconnect.
//!
//! ```text
//! Disconnected --connect--> Connecting --hello/identify--> Connected
//!      ^                                                       |
//!      '-------------------- disconnect/error -----------------'
//!      |
//!      '--close()--> Closed (terminal)
//! ```

pub mod backoff;
pub mod error;
pub mod frame;
pub mod opcodes;
pub mod properties;
pub mod reconnector;
pub mod session;
pub mod supervisor;
pub mod websocket;

pub use error::Error;
pub use session::{Session, SessionCallbacks};
pub use supervisor::Supervisor;
