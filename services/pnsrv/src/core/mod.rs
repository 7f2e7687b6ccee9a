//! Core controller components
//!
//! - **`config`** - YAML + environment configuration and validation
//! - **`transport`** - raw Ethernet / UDP transport and the in-process mock
//! - **`devices`** - per-device state machines and the device manager
//! - **`bootstrap`** - command line, logging and startup checks

pub mod bootstrap;
pub mod config;
pub mod devices;
pub mod transport;
