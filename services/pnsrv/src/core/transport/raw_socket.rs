//! Linux transport: AF_PACKET raw socket plus a UDP socket for RPC
//!
//! The packet socket is bound to the interface and to EtherType 0x8892, so
//! the kernel only hands us PROFINET frames. Frames carrying our own source
//! MAC are the kernel's loopback copies of what we sent and are skipped.

use std::ffi::CString;
use std::io::{self, Read};
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use super::traits::{DeviceEndpoint, Transport, TransportError, TransportFactory, TransportStats};
use crate::core::config::parse_mac;
use crate::protocols::profinet::constants::{ETHERTYPE_PROFINET, RPC_PORT};

const FRAME_BUFFER_LEN: usize = 1522;
const DATAGRAM_BUFFER_LEN: usize = 4096;

fn interface_index(interface: &str) -> Result<u32, TransportError> {
    let name = CString::new(interface)
        .map_err(|_| TransportError::InterfaceNotFound(interface.to_string()))?;
    // SAFETY: `name` is a valid NUL-terminated string
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(TransportError::InterfaceNotFound(interface.to_string()));
    }
    Ok(index)
}

/// `sockaddr_ll` for `bind`; socket2 has no link-layer address constructor
fn link_address(ifindex: u32, protocol: u16) -> SockAddr {
    // SAFETY: sockaddr_storage is plain old data, all-zero is a valid value
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_ll
    let ll = unsafe {
        &mut *(&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr_ll>()
    };
    ll.sll_family = libc::AF_PACKET as u16;
    ll.sll_protocol = protocol;
    ll.sll_ifindex = ifindex as i32;
    let len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
    // SAFETY: storage holds an initialized sockaddr_ll of `len` bytes
    unsafe { SockAddr::new(storage, len) }
}

/// Non-blocking AF_PACKET socket registered with the tokio reactor
#[derive(Debug)]
struct PacketSocket {
    socket: AsyncFd<Socket>,
    mac: [u8; 6],
}

impl PacketSocket {
    fn open(interface: &str, mac: [u8; 6]) -> Result<Self, TransportError> {
        let ifindex = interface_index(interface)?;
        let protocol = ETHERTYPE_PROFINET.to_be();
        let os_err = |e: io::Error| TransportError::from_io(&e, interface);

        let socket = Socket::new(
            Domain::PACKET,
            Type::RAW,
            Some(Protocol::from(i32::from(protocol))),
        )
        .map_err(os_err)?;
        socket.bind(&link_address(ifindex, protocol)).map_err(os_err)?;
        socket.set_nonblocking(true).map_err(os_err)?;
        debug!("{}: packet socket bound (ifindex {})", interface, ifindex);

        Ok(Self {
            socket: AsyncFd::new(socket).map_err(os_err)?,
            mac,
        })
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        loop {
            let mut guard = self
                .socket
                .writable()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            match guard.try_io(|inner| inner.get_ref().send(frame)) {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => return Err(TransportError::SendFailed(e.to_string())),
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            let mut guard = self
                .socket
                .readable()
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            let result = guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(buf)
            });
            match result {
                Ok(Ok(n)) if n >= 12 && buf[6..12] == self.mac => continue,
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Read the interface MAC from sysfs
pub fn interface_mac(interface: &str) -> Result<[u8; 6], TransportError> {
    let path = format!("/sys/class/net/{interface}/address");
    let text = std::fs::read_to_string(&path)
        .map_err(|_| TransportError::InterfaceNotFound(interface.to_string()))?;
    parse_mac(text.trim()).ok_or_else(|| {
        TransportError::IoError(format!("{interface}: unreadable MAC address '{}'", text.trim()))
    })
}

/// Raw-socket transport for one device session (or discovery when `rpc` is None)
#[derive(Debug)]
pub struct RawTransport {
    name: String,
    interface: String,
    mac: [u8; 6],
    link: Option<PacketSocket>,
    rpc: Option<UdpSocket>,
    stats: TransportStats,
}

#[async_trait]
impl Transport for RawTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_mac(&self) -> [u8; 6] {
        self.mac
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::Closed)?;
        link.send(frame).await?;
        self.stats.record_frame_sent(frame.len());
        trace!("{}: tx {}", self.interface, common::hex::dump(frame, 24));
        Ok(())
    }

    async fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::Closed)?;
        let mut buf = vec![0u8; FRAME_BUFFER_LEN];
        match tokio::time::timeout(timeout, link.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                self.stats.record_frame_received(n);
                Ok(Some(buf))
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    async fn send_rpc(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        let rpc = self.rpc.as_ref().ok_or_else(|| {
            TransportError::Unsupported("RPC on a link-only transport".to_string())
        })?;
        rpc.send(datagram)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.stats.record_datagram_sent(datagram.len());
        Ok(())
    }

    async fn recv_rpc(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let rpc = self.rpc.as_ref().ok_or_else(|| {
            TransportError::Unsupported("RPC on a link-only transport".to_string())
        })?;
        let mut buf = vec![0u8; DATAGRAM_BUFFER_LEN];
        match tokio::time::timeout(timeout, rpc.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                self.stats.record_datagram_received(n);
                Ok(Some(buf))
            },
            Ok(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.link.take().is_some() {
            debug!("{}: transport closed", self.name);
        }
        self.rpc = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Opens [`RawTransport`]s on one interface
#[derive(Debug, Clone)]
pub struct RawTransportFactory {
    interface: String,
    mac: [u8; 6],
}

impl RawTransportFactory {
    pub fn new(interface: &str) -> Result<Self, TransportError> {
        Ok(Self {
            interface: interface.to_string(),
            mac: interface_mac(interface)?,
        })
    }

    fn transport(&self, name: String, rpc: Option<UdpSocket>) -> Result<RawTransport, TransportError> {
        Ok(RawTransport {
            name,
            interface: self.interface.clone(),
            mac: self.mac,
            link: Some(PacketSocket::open(&self.interface, self.mac)?),
            rpc,
            stats: TransportStats::new(),
        })
    }
}

#[async_trait]
impl TransportFactory for RawTransportFactory {
    async fn open_link(&self) -> Result<Box<dyn Transport>, TransportError> {
        let t = self.transport(format!("{}/dcp", self.interface), None)?;
        Ok(Box::new(t))
    }

    async fn open_device(
        &self,
        endpoint: &DeviceEndpoint,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        socket
            .connect(SocketAddrV4::new(endpoint.ip, RPC_PORT))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {e}", endpoint.ip)))?;
        let t = self.transport(
            format!("{}/{}", self.interface, endpoint.station_name),
            Some(socket),
        )?;
        Ok(Box::new(t))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_link_address_layout() {
        let addr = link_address(3, ETHERTYPE_PROFINET.to_be());
        assert_eq!(addr.family(), libc::AF_PACKET as libc::sa_family_t);
        assert_eq!(addr.len() as usize, mem::size_of::<libc::sockaddr_ll>());

        // SAFETY: the address was built from a sockaddr_ll
        let ll = unsafe { &*addr.as_ptr().cast::<libc::sockaddr_ll>() };
        assert_eq!(ll.sll_ifindex, 3);
        assert_eq!(u16::from_be(ll.sll_protocol), 0x8892);
    }

    #[test]
    fn test_interface_index() {
        assert!(interface_index("lo").unwrap() > 0);
        assert!(matches!(
            interface_index("pn-missing0"),
            Err(TransportError::InterfaceNotFound(_))
        ));
        assert!(matches!(
            interface_index("bad\0name"),
            Err(TransportError::InterfaceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_on_loopback_needs_privilege() {
        match PacketSocket::open("lo", [0; 6]) {
            Ok(_) => {},
            Err(e) => assert!(matches!(e, TransportError::PermissionDenied(_)), "{e:?}"),
        }
    }
}
