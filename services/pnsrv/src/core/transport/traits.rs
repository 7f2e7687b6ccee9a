//! Transport Layer Traits
//!
//! A PROFINET controller talks to a device over two paths: layer-2 frames
//! (DCP and cyclic RT, EtherType 0x8892) and UDP datagrams for the
//! connection-setup RPCs. [`Transport`] bundles both for one device session.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Raw sockets need CAP_NET_RAW (or root)
    #[error("Permission denied on {0}: raw sockets need CAP_NET_RAW")]
    PermissionDenied(String),

    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Transport closed")]
    Closed,

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Map an OS error, keeping EPERM/EACCES as a typed privilege failure
    pub fn from_io(err: &std::io::Error, interface: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(interface.to_string()),
            std::io::ErrorKind::NotFound => Self::InterfaceNotFound(interface.to_string()),
            _ => Self::IoError(format!("{interface}: {err}")),
        }
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_activity: Option<SystemTime>,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
        self.last_activity = Some(SystemTime::now());
    }

    pub fn record_frame_received(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
        self.last_activity = Some(SystemTime::now());
    }

    pub fn record_datagram_sent(&mut self, bytes: usize) {
        self.datagrams_sent += 1;
        self.bytes_sent += bytes as u64;
        self.last_activity = Some(SystemTime::now());
    }

    pub fn record_datagram_received(&mut self, bytes: usize) {
        self.datagrams_received += 1;
        self.bytes_received += bytes as u64;
        self.last_activity = Some(SystemTime::now());
    }
}

/// Core transport trait for one device session
///
/// Receive calls return `Ok(None)` when nothing arrived within `timeout`.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// MAC address of the local interface
    fn local_mac(&self) -> [u8; 6];

    /// Send one complete Ethernet frame
    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receive the next PROFINET frame
    async fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Send one RPC datagram to the device
    async fn send_rpc(&mut self, datagram: &[u8]) -> Result<(), TransportError>;

    /// Receive the next RPC datagram from the device
    async fn recv_rpc(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the underlying sockets; further calls fail with `Closed`
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    fn stats(&self) -> TransportStats;
}

/// Where a device lives on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub station_name: String,
    pub ip: Ipv4Addr,
    pub mac: Option<[u8; 6]>,
}

/// Opens transports on the controller's interface
#[async_trait]
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Layer-2 only transport, used for discovery
    async fn open_link(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Full transport (frames plus RPC) for one device
    async fn open_device(
        &self,
        endpoint: &DeviceEndpoint,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(
            TransportError::from_io(&err, "eth0"),
            TransportError::PermissionDenied("eth0".to_string())
        );
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            TransportError::from_io(&err, "eth9"),
            TransportError::InterfaceNotFound(_)
        ));
    }

    #[test]
    fn test_stats_counters() {
        let mut stats = TransportStats::new();
        stats.record_frame_sent(60);
        stats.record_datagram_received(100);
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.datagrams_received, 1);
        assert_eq!(stats.bytes_sent, 60);
        assert_eq!(stats.bytes_received, 100);
        assert!(stats.last_activity.is_some());
    }
}
