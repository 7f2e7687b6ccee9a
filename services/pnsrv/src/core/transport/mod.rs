//! Transport Layer Module
//!
//! Separates socket handling from the PROFINET protocol logic.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   DCP / Connect RPC / cyclic RT (protocols)  │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │   Transport trait                            │
//! │   send_frame/recv_frame, send_rpc/recv_rpc   │
//! └──────────────────────────────────────────────┘
//!            │                        │
//!            ▼                        ▼
//!   ┌──────────────────┐    ┌──────────────────┐
//!   │ Raw (AF_PACKET + │    │ Mock (simulated  │
//!   │ UDP), Linux only │    │ RTUs in-process) │
//!   └──────────────────┘    └──────────────────┘
//! ```

pub mod capability;
pub mod mock;
#[cfg(target_os = "linux")]
pub mod raw_socket;
pub mod traits;

pub use traits::{DeviceEndpoint, Transport, TransportError, TransportFactory, TransportStats};
