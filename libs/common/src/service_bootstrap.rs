//! Unified service bootstrap utilities
//!
//! Startup banner and logging initialization shared by VoltageEMS services.

use crate::logging::{self, LogConfig};
use tracing::{info, Level};

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "pnsrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    pub description: String,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = match service.name.as_str() {
        "pnsrv" => {
            r#"
 ██████╗ ███╗   ██╗███████╗██████╗ ██╗   ██╗
 ██╔══██╗████╗  ██║██╔════╝██╔══██╗██║   ██║
 ██████╔╝██╔██╗ ██║███████╗██████╔╝██║   ██║
 ██╔═══╝ ██║╚██╗██║╚════██║██╔══██╗╚██╗ ██╔╝
 ██║     ██║ ╚████║███████║██║  ██║ ╚████╔╝
 ╚═╝     ╚═╝  ╚═══╝╚══════╝╚═╝  ╚═╝  ╚═══╝
            "#
        },
        _ => {
            r#"
 ██╗   ██╗ ██████╗ ██╗  ████████╗ █████╗  ██████╗ ███████╗
 ██║   ██║██╔═══██╗██║  ╚══██╔══╝██╔══██╗██╔════╝ ██╔════╝
 ██║   ██║██║   ██║██║     ██║   ███████║██║  ███╗█████╗
 ╚██╗ ██╔╝██║   ██║██║     ██║   ██╔══██║██║   ██║██╔══╝
  ╚████╔╝ ╚██████╔╝███████╗██║   ██║  ██║╚██████╔╝███████╗
   ╚═══╝   ╚═════╝ ╚══════╝╚═╝   ╚═╝  ╚═╝ ╚═════╝ ╚══════╝
            "#
        },
    };

    info!("{}", banner);
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Initialize logging for a service with standard configuration
///
/// Log root directory priority:
/// 1. VOLTAGE_LOG_DIR environment variable
/// 2. `log_dir` from the service config
/// 3. Default "logs"
pub fn init_logging(
    service: &ServiceInfo,
    log_dir: Option<&str>,
    console_level: Level,
    json_file: bool,
    ansi: bool,
) -> anyhow::Result<()> {
    logging::init_log_root(log_dir);

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir: logging::get_log_root().join(&service.name),
        console_level,
        enable_file: true,
        enable_json: json_file,
        ansi,
    };

    logging::init_with_config(log_config).map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_service_info_creation() {
        let service = ServiceInfo::new("pnsrv", "0.1.0", "PROFINET IO controller");
        assert_eq!(service.name, "pnsrv");
        assert_eq!(service.version, "0.1.0");
    }
}
