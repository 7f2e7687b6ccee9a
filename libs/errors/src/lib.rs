//! Unified error handling for VoltageEMS services
//!
//! Service crates keep their own fine-grained error enums and convert into
//! [`VoltageError`] at the process boundary (binary `main`).

use thiserror::Error;

// ============================================================================
// VoltageError - Main error type
// ============================================================================

/// Main error type for all VoltageEMS services
#[derive(Debug, Error)]
pub enum VoltageError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    // ======================================
    // Validation Errors
    // ======================================
    #[error("Invalid parameter: {param}: {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ======================================
    // Resource Errors
    // ======================================
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // ======================================
    // Serialization & Runtime Errors
    // ======================================
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using VoltageError
pub type VoltageResult<T> = Result<T, VoltageError>;

impl From<serde_json::Error> for VoltageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
