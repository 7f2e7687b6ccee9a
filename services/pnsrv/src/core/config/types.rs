//! Configuration types

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::protocols::profinet::constants::{INPUT_SLOT_DATA_LEN, OUTPUT_SLOT_DATA_LEN};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Service configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Network interface facing the devices
    #[serde(default = "default_interface")]
    pub interface: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            interface: default_interface(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory; `VOLTAGE_LOG_DIR` takes precedence
    pub dir: Option<String>,

    #[serde(default = "default_true")]
    pub console: bool,

    /// JSON lines in the log file instead of text
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            console: true,
            json: false,
        }
    }
}

/// Controller timing and retry parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Bound for each connection-establishment step
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,

    /// Upper bound on connect attempts across all strategies
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,

    /// Consecutive missed cycles before `comm_failure`
    #[serde(default = "default_missed_cycle_threshold")]
    pub missed_cycle_threshold: u32,

    /// Time allowed in DISCOVERY for the first valid input frame
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            max_attempts: default_max_attempts(),
            cycle_time_ms: default_cycle_time_ms(),
            missed_cycle_threshold: default_missed_cycle_threshold(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Supervisor reconnect behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 0 retries forever
    #[serde(default)]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 0,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            scan_interval_ms: default_scan_interval_ms(),
        }
    }
}

/// One configured RTU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub station_name: String,

    pub ip: Ipv4Addr,

    /// Expected MAC, `AA:BB:CC:DD:EE:FF`; learned via DCP when absent
    #[serde(default)]
    pub mac: Option<String>,

    #[serde(default)]
    pub vendor_id: u16,

    #[serde(default)]
    pub device_id: u16,

    /// Instance part of the PNIO object UUID
    #[serde(default = "default_instance")]
    pub instance: u16,

    #[serde(default)]
    pub auto_connect: bool,

    /// Overrides `controller.cycle_time_ms`
    #[serde(default)]
    pub cycle_time_ms: Option<u64>,

    #[serde(default)]
    pub slots: Vec<SlotConfig>,
}

impl DeviceConfig {
    pub fn new(station_name: &str, ip: Ipv4Addr, slots: Vec<SlotConfig>) -> Self {
        Self {
            station_name: station_name.to_string(),
            ip,
            mac: None,
            vendor_id: 0,
            device_id: 0,
            instance: default_instance(),
            auto_connect: false,
            cycle_time_ms: None,
            slots,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotDirection {
    Input,
    Output,
}

/// One configured slot (one submodule per slot)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub slot: u16,

    #[serde(default = "default_subslot")]
    pub subslot: u16,

    pub direction: SlotDirection,

    #[serde(default)]
    pub module_ident: u32,

    #[serde(default)]
    pub submodule_ident: u32,

    /// IO data bytes; defaults to 5 for inputs (f32 + quality) and 4 for outputs
    #[serde(default)]
    pub data_length: Option<u16>,
}

impl SlotConfig {
    pub fn input(slot: u16, module_ident: u32, submodule_ident: u32) -> Self {
        Self::new(slot, SlotDirection::Input, module_ident, submodule_ident)
    }

    pub fn output(slot: u16, module_ident: u32, submodule_ident: u32) -> Self {
        Self::new(slot, SlotDirection::Output, module_ident, submodule_ident)
    }

    fn new(slot: u16, direction: SlotDirection, module_ident: u32, submodule_ident: u32) -> Self {
        Self {
            slot,
            subslot: default_subslot(),
            direction,
            module_ident,
            submodule_ident,
            data_length: None,
        }
    }

    pub fn data_length(&self) -> u16 {
        self.data_length.unwrap_or(self.min_data_length())
    }

    /// Smallest length that still holds the slot's value layout
    pub fn min_data_length(&self) -> u16 {
        match self.direction {
            SlotDirection::Input => INPUT_SLOT_DATA_LEN,
            SlotDirection::Output => OUTPUT_SLOT_DATA_LEN,
        }
    }
}

fn default_service_name() -> String {
    "pnsrv".to_string()
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_step_timeout_ms() -> u64 {
    3000
}

fn default_max_attempts() -> u32 {
    8
}

fn default_cycle_time_ms() -> u64 {
    32
}

fn default_missed_cycle_threshold() -> u32 {
    3
}

fn default_discovery_timeout_ms() -> u64 {
    2000
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_scan_interval_ms() -> u64 {
    1000
}

fn default_instance() -> u16 {
    1
}

fn default_subslot() -> u16 {
    1
}
