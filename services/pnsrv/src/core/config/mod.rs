//! # Configuration Management Module
//!
//! ```text
//! ConfigManager
//!   ├── Service Configuration (interface, logging)
//!   ├── Controller Configuration (timeouts, cycle, reconnect)
//!   └── Devices (station, address, slots)
//! ```

pub mod loader;
pub mod types;

pub use loader::{parse_mac, validate_device, ConfigManager};
pub use types::{
    AppConfig, ControllerConfig, DeviceConfig, LoggingConfig, ReconnectConfig, ServiceConfig,
    SlotConfig, SlotDirection,
};
