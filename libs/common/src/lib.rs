//! `VoltageEMS` basic library
//!
//! Provides basic functions shared by all services, including:
//! - logging functions
//! - startup banner, arguments and system checks
//! - hex formatting for frame dumps

pub mod bootstrap_args;
pub mod bootstrap_system;
pub mod hex;
pub mod logging;
pub mod service_bootstrap;

pub use bootstrap_args::ServiceArgs;
pub use logging::LogConfig;
pub use service_bootstrap::ServiceInfo;

// Re-export CLI dependencies when cli feature is enabled
#[cfg(feature = "cli")]
pub use clap;
