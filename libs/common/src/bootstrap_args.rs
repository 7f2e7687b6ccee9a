//! Common command-line arguments for all VoltageEMS services
//!
//! Provides a unified argument structure that can be extended by individual services

#[cfg(feature = "cli")]
use clap::Parser;

/// Common service startup arguments
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", clap(author, version, about))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[cfg_attr(
        feature = "cli",
        clap(short = 'l', long, default_value = "info", env = "RUST_LOG")
    )]
    pub log_level: String,

    /// Enable debug mode with verbose output
    #[cfg_attr(feature = "cli", clap(long, env = "DEBUG"))]
    pub debug: bool,

    /// Disable colored output (useful for log files)
    #[cfg_attr(feature = "cli", clap(long))]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[cfg_attr(feature = "cli", clap(long))]
    pub validate: bool,

    /// Configuration file path override
    #[cfg_attr(feature = "cli", clap(short = 'c', long, env = "CONFIG_FILE"))]
    pub config_path: Option<String>,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            debug: false,
            no_color: false,
            validate: false,
            config_path: None,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        if self.debug {
            return tracing::Level::DEBUG;
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Get configuration file path with service defaults
    ///
    /// Priority: explicit argument > `VOLTAGE_CONFIG_DIR/{service}.yaml` > `config/{service}.yaml`
    pub fn get_config_path(&self, service_name: &str) -> String {
        if let Some(path) = &self.config_path {
            return path.clone();
        }

        if let Ok(dir) = std::env::var("VOLTAGE_CONFIG_DIR") {
            return format!("{}/{}.yaml", dir, service_name);
        }

        format!("config/{}.yaml", service_name)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.log_level, "info");
        assert!(!args.debug);
        assert!(!args.validate);
    }

    #[test]
    fn test_parse_log_level() {
        let args = ServiceArgs {
            log_level: "WARN".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::WARN);

        let args = ServiceArgs {
            log_level: "invalid".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);

        let args = ServiceArgs {
            log_level: "error".to_string(),
            debug: true,
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let args = ServiceArgs {
            config_path: Some("/etc/pnsrv/site.yaml".to_string()),
            ..Default::default()
        };
        assert_eq!(args.get_config_path("pnsrv"), "/etc/pnsrv/site.yaml");
    }
}
