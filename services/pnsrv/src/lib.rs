//! PROFINET IO Controller Service (pnsrv)
//!
//! Connects to remote terminal units over PROFINET IO, brings each one
//! through discovery and connection setup, then exchanges cyclic process
//! data with it.
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   Config Mgr    │───►│  DeviceManager  │───►│ Session tasks   │
//! │ (YAML + env)    │    │ (state machines)│    │ (one per RTU)   │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!          │                      │                      │
//!          ▼                      ▼                      ▼
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   Supervisor    │    │  Event stream   │    │   Transport     │
//! │ (auto-connect)  │    │  (broadcast)    │    │ (raw L2 + UDP)  │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```

pub mod core;
pub mod error;
pub mod protocols;
pub mod runtime;

pub use crate::core::config::ConfigManager;
pub use crate::core::devices::{ConnectionState, DeviceManager};
pub use error::{PnioError, Result};
