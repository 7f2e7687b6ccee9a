//! Service Bootstrap and Initialization
//!
//! Command line, logging setup, startup checks and transport selection.
//! Uses common bootstrap utilities for shared functionality.

use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info, warn};

use common::service_bootstrap::ServiceInfo;
use errors::{VoltageError, VoltageResult};

use crate::core::config::{AppConfig, ConfigManager};
use crate::core::transport::capability::{check_interface, check_raw_socket_privilege};
use crate::core::transport::mock::{MockNetwork, SimulatedRtu};
use crate::core::transport::TransportFactory;
use crate::error::PnioError;

// Re-export common bootstrap functionality
pub use common::bootstrap_args::ServiceArgs;
pub use common::bootstrap_system::check_system_requirements;

pub const SERVICE_NAME: &str = "pnsrv";

/// Command-line arguments for pnsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pnsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "PROFINET IO Controller Service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (default: $VOLTAGE_CONFIG_DIR/pnsrv.yaml or config/pnsrv.yaml)
    #[arg(short = 'c', long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Network interface facing the devices, overrides `service.interface`
    #[arg(short = 'i', long)]
    pub interface: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Enable debug mode
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,

    /// Run a DCP Identify for the given number of seconds, print the result and exit
    #[arg(long, value_name = "SECS")]
    pub discover: Option<u64>,

    /// Talk to in-process simulated RTUs built from the device list
    #[arg(long)]
    pub simulate: bool,
}

impl From<Args> for ServiceArgs {
    fn from(args: Args) -> Self {
        ServiceArgs {
            log_level: args.log_level,
            debug: args.debug,
            no_color: args.no_color,
            validate: args.validate,
            config_path: args.config,
        }
    }
}

pub fn service_info() -> ServiceInfo {
    ServiceInfo::new(
        SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        "PROFINET IO Controller Service",
    )
}

/// Load the configuration file and apply command-line overrides
pub fn load_configuration(args: &ServiceArgs, interface: Option<&str>) -> VoltageResult<AppConfig> {
    let path = args.get_config_path(SERVICE_NAME);
    let manager = ConfigManager::from_file(&path)?;
    manager.validate()?;
    let mut config = manager.into_config();
    if let Some(iface) = interface {
        config.service.interface = iface.to_string();
    }
    Ok(config)
}

/// Initialize logging system with command-line arguments
///
/// Log root directory priority:
/// 1. VOLTAGE_LOG_DIR environment variable
/// 2. `service.logging.dir` from the config file
/// 3. Default "logs"
pub fn initialize_logging(
    args: &ServiceArgs,
    service_info: &ServiceInfo,
    config: &AppConfig,
) -> VoltageResult<()> {
    let logging = &config.service.logging;
    // An explicit CLI level wins over the file
    let level = if args.log_level != "info" || args.debug {
        args.parse_log_level()
    } else {
        ServiceArgs {
            log_level: logging.level.clone(),
            ..ServiceArgs::default()
        }
        .parse_log_level()
    };

    common::service_bootstrap::init_logging(
        service_info,
        logging.dir.as_deref(),
        level,
        logging.json,
        !args.no_color,
    )
    .map_err(|e| VoltageError::Configuration(format!("Failed to init logging: {}", e)))
}

/// Console-only logging for `--validate` and `--discover`
pub fn initialize_console_logging(
    args: &ServiceArgs,
    service_info: &ServiceInfo,
) -> VoltageResult<()> {
    common::logging::init_console(&service_info.name, args.parse_log_level(), !args.no_color)
        .map_err(|e| VoltageError::Configuration(format!("Failed to init logging: {}", e)))
}

/// Validate the configuration file and print a summary
pub fn validate_configuration(config: &AppConfig) {
    info!("Service: {}", config.service.name);
    info!("Interface: {}", config.service.interface);
    info!("Found {} device(s)", config.devices.len());
    for device in &config.devices {
        info!(
            "  {} @ {} ({} slot(s){})",
            device.station_name,
            device.ip,
            device.slots.len(),
            if device.auto_connect {
                ", auto-connect"
            } else {
                ""
            }
        );
    }
    info!("Configuration validation completed successfully");
}

/// Pick the transport: raw sockets on the configured interface, or the
/// simulated network when `simulate` is set
///
/// Raw sockets fail closed: a missing privilege stops startup here.
pub fn create_transport_factory(
    config: &AppConfig,
    simulate: bool,
) -> VoltageResult<Arc<dyn TransportFactory>> {
    if simulate {
        let network = MockNetwork::new();
        for device in &config.devices {
            network.add_device(SimulatedRtu::from_config(device));
        }
        warn!(
            "Simulation mode: {} device(s) answered in-process",
            config.devices.len()
        );
        return Ok(Arc::new(network.factory()));
    }

    let interface = config.service.interface.as_str();
    check_interface(interface).map_err(PnioError::from)?;
    check_raw_socket_privilege(interface).map_err(PnioError::from)?;
    debug!("Raw socket privilege present on {}", interface);
    raw_factory(interface)
}

#[cfg(target_os = "linux")]
fn raw_factory(interface: &str) -> VoltageResult<Arc<dyn TransportFactory>> {
    let factory = crate::core::transport::raw_socket::RawTransportFactory::new(interface)
        .map_err(PnioError::from)?;
    info!("Raw transport on {}", interface);
    Ok(Arc::new(factory))
}

#[cfg(not(target_os = "linux"))]
fn raw_factory(interface: &str) -> VoltageResult<Arc<dyn TransportFactory>> {
    Err(PnioError::from(crate::core::transport::TransportError::Unsupported(format!(
        "raw sockets on {interface} are only available on Linux; use --simulate"
    )))
    .into())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_into_service_args() {
        let args = Args::parse_from([
            "pnsrv",
            "-c",
            "/etc/pnsrv/site.yaml",
            "--discover",
            "3",
            "--validate",
        ]);
        assert_eq!(args.discover, Some(3));
        let service: ServiceArgs = args.into();
        assert!(service.validate);
        assert_eq!(service.get_config_path(SERVICE_NAME), "/etc/pnsrv/site.yaml");
    }

    #[test]
    fn test_load_configuration_with_interface_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
service:
  interface: eth1
devices:
  - station_name: rtu-01
    ip: 192.168.1.10
    slots:
      - {{ slot: 1, direction: input }}
"#
        )
        .unwrap();
        let args = ServiceArgs {
            config_path: Some(file.path().display().to_string()),
            ..ServiceArgs::default()
        };

        let config = load_configuration(&args, None).unwrap();
        assert_eq!(config.service.interface, "eth1");
        let config = load_configuration(&args, Some("enp3s0")).unwrap();
        assert_eq!(config.service.interface, "enp3s0");
    }

    #[test]
    fn test_missing_config_is_configuration_error() {
        let args = ServiceArgs {
            config_path: Some("/nonexistent/pnsrv.yaml".to_string()),
            ..ServiceArgs::default()
        };
        assert!(matches!(
            load_configuration(&args, None),
            Err(VoltageError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_simulated_factory_answers_discovery() {
        let config = ConfigManager::from_yaml_str(
            r#"
devices:
  - station_name: rtu-01
    ip: 192.168.1.10
    slots:
      - { slot: 1, direction: input }
"#,
        )
        .unwrap()
        .into_config();
        let factory = create_transport_factory(&config, true).unwrap();
        let mut link = factory.open_link().await.unwrap();
        let found = crate::protocols::profinet::dcp::discover(
            link.as_mut(),
            std::time::Duration::from_millis(50),
            None,
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].station_name, "rtu-01");
    }
}
