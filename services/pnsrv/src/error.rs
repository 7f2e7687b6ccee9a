//! Error handling for the PROFINET controller service
//!
//! Fine-grained service errors; converted into [`errors::VoltageError`] at the
//! process boundary.

use thiserror::Error;

use crate::core::devices::ConnectionState;
use crate::core::transport::TransportError;
use crate::protocols::profinet::codec::CodecError;
use crate::protocols::profinet::resilience::ErrorClassification;

/// PROFINET Service Error Type
#[derive(Error, Debug, Clone)]
pub enum PnioError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device already exists: {0}")]
    DeviceExists(String),

    /// Another device is in CONNECTING; carries the blocking station name
    #[error("busy: {0}")]
    Busy(String),

    #[error("Invalid transition: {trigger} from {from}")]
    InvalidTransition {
        from: ConnectionState,
        trigger: String,
    },

    #[error("Invalid state for {operation}: {station} is {state}")]
    InvalidState {
        station: String,
        state: ConnectionState,
        operation: &'static str,
    },

    #[error("{station}: connect failed: {}", classification.describe())]
    ConnectFailed {
        station: String,
        classification: ErrorClassification,
    },

    #[error("{0}: connect aborted")]
    Aborted(String),

    #[error("Command rejected: {0}")]
    CommandError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, PnioError>;

impl From<figment::Error> for PnioError {
    fn from(err: figment::Error) -> Self {
        PnioError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for PnioError {
    fn from(err: std::io::Error) -> Self {
        PnioError::InternalError(err.to_string())
    }
}

impl From<PnioError> for errors::VoltageError {
    fn from(err: PnioError) -> Self {
        use errors::VoltageError;

        match err {
            PnioError::ConfigError(msg) => VoltageError::Configuration(msg),
            PnioError::Transport(TransportError::PermissionDenied(iface)) => {
                VoltageError::Forbidden(format!("raw socket on {iface} needs CAP_NET_RAW"))
            },
            PnioError::Transport(e) => VoltageError::Communication(e.to_string()),
            PnioError::Codec(e) => VoltageError::Protocol {
                protocol: "profinet".to_string(),
                message: e.to_string(),
            },
            PnioError::DeviceNotFound(name) => VoltageError::NotFound { resource: name },
            PnioError::DeviceExists(name) => VoltageError::AlreadyExists(name),
            PnioError::Busy(name) => VoltageError::ResourceBusy(name),
            e @ (PnioError::InvalidTransition { .. } | PnioError::InvalidState { .. }) => {
                VoltageError::InvalidState(e.to_string())
            },
            PnioError::ConnectFailed {
                station,
                classification,
            } => VoltageError::ConnectionFailed {
                endpoint: station,
                reason: classification.describe(),
            },
            e @ PnioError::Aborted(_) => VoltageError::Communication(e.to_string()),
            PnioError::CommandError(msg) => VoltageError::InvalidParameter {
                param: "command".to_string(),
                reason: msg,
            },
            PnioError::InternalError(msg) => VoltageError::Internal(msg),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_busy_message_names_blocking_station() {
        assert_eq!(PnioError::Busy("rtu-01".into()).to_string(), "busy: rtu-01");
    }

    #[test]
    fn test_voltage_conversion() {
        let e: errors::VoltageError =
            PnioError::Transport(TransportError::PermissionDenied("eth0".into())).into();
        assert!(matches!(e, errors::VoltageError::Forbidden(_)));
        let e: errors::VoltageError = PnioError::Busy("rtu-01".into()).into();
        assert!(matches!(e, errors::VoltageError::ResourceBusy(_)));
    }
}
