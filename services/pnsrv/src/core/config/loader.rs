//! Configuration loading and validation
//!
//! YAML file merged with `PNSRV_` environment overrides, nested keys split
//! on `__` (`PNSRV_CONTROLLER__CYCLE_TIME_MS=64`).

use std::collections::HashSet;
use std::path::Path;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use tracing::debug;

use super::types::{AppConfig, ControllerConfig, DeviceConfig, ServiceConfig, SlotDirection};
use crate::error::{PnioError, Result};
use crate::protocols::profinet::constants::{MAX_REDUCTION_RATIO, RT_MIN_C_SDU_LEN};

const ENV_PREFIX: &str = "PNSRV_";
/// Largest C_SDU an RT_CLASS_1 frame can carry
const MAX_C_SDU_LEN: usize = 1440;

/// Configuration manager
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: AppConfig,
}

impl ConfigManager {
    /// Load configuration from a YAML file plus environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml" | "yml") => {},
            other => {
                return Err(PnioError::ConfigError(format!(
                    "Unsupported config format: {}",
                    other.unwrap_or("<none>")
                )))
            },
        }
        if !path.exists() {
            return Err(PnioError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        debug!("Loading config from {}", path.display());
        Self::extract(Figment::new().merge(Yaml::file(path)))
    }

    /// Load configuration from YAML text plus environment overrides
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::extract(Figment::new().merge(Yaml::string(yaml)))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| PnioError::ConfigError(format!("Failed to parse config: {e}")))?;
        Ok(Self { config })
    }

    pub fn from_config(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn into_config(self) -> AppConfig {
        self.config
    }

    pub fn service_config(&self) -> &ServiceConfig {
        &self.config.service
    }

    pub fn controller(&self) -> &ControllerConfig {
        &self.config.controller
    }

    pub fn devices(&self) -> &[DeviceConfig] {
        &self.config.devices
    }

    pub fn get_device(&self, station_name: &str) -> Option<&DeviceConfig> {
        self.config
            .devices
            .iter()
            .find(|d| d.station_name == station_name)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_controller(&self.config.controller)?;

        let mut names = HashSet::new();
        for device in &self.config.devices {
            if !names.insert(device.station_name.to_ascii_lowercase()) {
                return Err(PnioError::ConfigError(format!(
                    "Duplicate station name: {}",
                    device.station_name
                )));
            }
            validate_device(device)?;
        }
        Ok(())
    }
}

fn validate_controller(c: &ControllerConfig) -> Result<()> {
    validate_cycle_time(c.cycle_time_ms, "controller.cycle_time_ms")?;
    if c.step_timeout_ms == 0 {
        return Err(PnioError::ConfigError(
            "controller.step_timeout_ms must be > 0".to_string(),
        ));
    }
    if c.max_attempts == 0 {
        return Err(PnioError::ConfigError(
            "controller.max_attempts must be > 0".to_string(),
        ));
    }
    if c.missed_cycle_threshold == 0 {
        return Err(PnioError::ConfigError(
            "controller.missed_cycle_threshold must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_cycle_time(ms: u64, field: &str) -> Result<()> {
    if ms == 0 || ms > u64::from(MAX_REDUCTION_RATIO) {
        return Err(PnioError::ConfigError(format!(
            "{field} must be within 1..={MAX_REDUCTION_RATIO} ms, got {ms}"
        )));
    }
    Ok(())
}

/// Station names follow DNS label rules: lowercase letters, digits, '-' and '.'
fn valid_station_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 240
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && !name.starts_with('-')
}

/// Checks one device on its own; station-name uniqueness is left to the caller
pub fn validate_device(d: &DeviceConfig) -> Result<()> {
    let name = &d.station_name;
    if !valid_station_name(name) {
        return Err(PnioError::ConfigError(format!(
            "Invalid station name: '{name}'"
        )));
    }
    if let Some(mac) = &d.mac {
        if parse_mac(mac).is_none() {
            return Err(PnioError::ConfigError(format!("{name}: invalid mac '{mac}'")));
        }
    }
    if let Some(ms) = d.cycle_time_ms {
        validate_cycle_time(ms, &format!("{name}.cycle_time_ms"))?;
    }
    if d.slots.is_empty() {
        return Err(PnioError::ConfigError(format!("{name}: no slots configured")));
    }

    let mut seen = HashSet::new();
    let mut input_len = 0usize;
    let mut output_len = 0usize;
    for s in &d.slots {
        if s.slot == 0 {
            return Err(PnioError::ConfigError(format!(
                "{name}: slot 0 is reserved for the device access point"
            )));
        }
        if !seen.insert(s.slot) {
            return Err(PnioError::ConfigError(format!(
                "{name}: duplicate slot {}",
                s.slot
            )));
        }
        if s.data_length() < s.min_data_length() {
            return Err(PnioError::ConfigError(format!(
                "{name}: slot {} data_length {} below minimum {}",
                s.slot,
                s.data_length(),
                s.min_data_length()
            )));
        }
        // data + IOPS in the own frame, IOCS in the other
        let own = s.data_length() as usize + 1;
        match s.direction {
            SlotDirection::Input => {
                input_len += own;
                output_len += 1;
            },
            SlotDirection::Output => {
                output_len += own;
                input_len += 1;
            },
        }
    }
    if input_len.max(RT_MIN_C_SDU_LEN) > MAX_C_SDU_LEN
        || output_len.max(RT_MIN_C_SDU_LEN) > MAX_C_SDU_LEN
    {
        return Err(PnioError::ConfigError(format!(
            "{name}: IO data exceeds {MAX_C_SDU_LEN} bytes per frame"
        )));
    }
    if !d.slots.iter().any(|s| s.direction == SlotDirection::Input) {
        return Err(PnioError::ConfigError(format!(
            "{name}: at least one input slot is required"
        )));
    }
    Ok(())
}

/// Parse `AA:BB:CC:DD:EE:FF` (or `-` separated)
pub fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split([':', '-']);
    for byte in &mut mac {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}
