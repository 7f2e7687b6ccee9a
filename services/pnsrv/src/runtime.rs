//! Runtime Orchestration Layer
//!
//! Auto-connect supervision, the backoff that drives it, and shutdown

pub mod lifecycle;
pub mod reconnect;

pub use lifecycle::{serve_until_shutdown, start_supervisor, ShutdownReason, Supervisor};
pub use reconnect::{ReconnectError, ReconnectHelper, ReconnectPolicy, ReconnectState};
