//! DCP Identify (layer-2 discovery)
//!
//! Frame layout after the Ethernet header:
//!
//! ```text
//! FrameID(2) ServiceID(1) ServiceType(1) Xid(4) ResponseDelay(2) DataLength(2) Blocks...
//! Block: Option(1) Suboption(1) Length(2) Value(Length) [pad to even]
//! ```
//!
//! Response values start with a 2-byte BlockInfo. Unknown blocks are skipped
//! by their declared length.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::codec::{ethernet_header, finish_frame, parse_ethernet, CodecError, CodecResult, Reader};
use super::constants::*;
use crate::core::transport::{Transport, TransportError};

/// IP parameters reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IpSettings {
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// A device that answered an Identify request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub mac: [u8; 6],
    /// `None` when the device has no IP configured yet
    pub ip: Option<IpSettings>,
    pub station_name: String,
    pub vendor_name: String,
    pub vendor_id: u16,
    pub device_id: u16,
    pub role: u16,
}

impl DiscoveredDevice {
    pub fn mac_string(&self) -> String {
        common::hex::mac(&self.mac)
    }
}

/// Decoded Identify request (used by simulated devices)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyRequest {
    pub xid: u32,
    pub src: [u8; 6],
    pub response_delay: u16,
    pub name_filter: Option<String>,
}

/// Decoded Identify response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyResponse {
    pub xid: u32,
    pub device: DiscoveredDevice,
}

fn put_dcp_header(buf: &mut BytesMut, frame_id: u16, service_type: u8, xid: u32, delay: u16) {
    buf.put_u16(frame_id);
    buf.put_u8(DCP_SERVICE_IDENTIFY);
    buf.put_u8(service_type);
    buf.put_u32(xid);
    buf.put_u16(delay);
}

fn put_block(blocks: &mut BytesMut, option: u8, suboption: u8, value: &[u8]) {
    blocks.put_u8(option);
    blocks.put_u8(suboption);
    blocks.put_u16(value.len() as u16);
    blocks.put_slice(value);
    if value.len() % 2 == 1 {
        blocks.put_u8(0);
    }
}

fn put_info_block(blocks: &mut BytesMut, option: u8, suboption: u8, info: u16, value: &[u8]) {
    let mut v = BytesMut::with_capacity(value.len() + 2);
    v.put_u16(info);
    v.put_slice(value);
    put_block(blocks, option, suboption, &v);
}

/// Build an Identify request. Without a filter this is Identify-All.
pub fn build_identify_request(src: &[u8; 6], xid: u32, name_filter: Option<&str>) -> Vec<u8> {
    let mut blocks = BytesMut::new();
    match name_filter {
        Some(name) => put_block(&mut blocks, DCP_OPT_DEVICE, DCP_SUB_DEVICE_NAME, name.as_bytes()),
        None => put_block(&mut blocks, DCP_OPT_ALL, DCP_SUB_ALL, &[]),
    }

    let mut buf = BytesMut::new();
    ethernet_header(&mut buf, &DCP_MULTICAST_MAC, src);
    put_dcp_header(
        &mut buf,
        FRAME_ID_DCP_IDENTIFY_REQ,
        DCP_SERVICE_TYPE_REQUEST,
        xid,
        DCP_DEFAULT_RESPONSE_DELAY,
    );
    buf.put_u16(blocks.len() as u16);
    buf.put_slice(&blocks);
    finish_frame(buf)
}

/// Build an Identify response as a device would send it
pub fn build_identify_response(dst: &[u8; 6], xid: u32, device: &DiscoveredDevice) -> Vec<u8> {
    let mut blocks = BytesMut::new();

    if let Some(ip) = &device.ip {
        let mut v = Vec::with_capacity(12);
        v.extend_from_slice(&ip.ip.octets());
        v.extend_from_slice(&ip.subnet.octets());
        v.extend_from_slice(&ip.gateway.octets());
        put_info_block(&mut blocks, DCP_OPT_IP, DCP_SUB_IP_PARAMETER, 0x0001, &v);
    }
    put_info_block(
        &mut blocks,
        DCP_OPT_DEVICE,
        DCP_SUB_DEVICE_VENDOR,
        0,
        device.vendor_name.as_bytes(),
    );
    put_info_block(
        &mut blocks,
        DCP_OPT_DEVICE,
        DCP_SUB_DEVICE_NAME,
        0,
        device.station_name.as_bytes(),
    );
    let mut id = [0u8; 4];
    id[..2].copy_from_slice(&device.vendor_id.to_be_bytes());
    id[2..].copy_from_slice(&device.device_id.to_be_bytes());
    put_info_block(&mut blocks, DCP_OPT_DEVICE, DCP_SUB_DEVICE_ID, 0, &id);
    put_info_block(
        &mut blocks,
        DCP_OPT_DEVICE,
        DCP_SUB_DEVICE_ROLE,
        0,
        &device.role.to_be_bytes(),
    );

    let mut buf = BytesMut::new();
    ethernet_header(&mut buf, dst, &device.mac);
    put_dcp_header(
        &mut buf,
        FRAME_ID_DCP_IDENTIFY_RES,
        DCP_SERVICE_TYPE_RESPONSE,
        xid,
        0,
    );
    buf.put_u16(blocks.len() as u16);
    buf.put_slice(&blocks);
    finish_frame(buf)
}

struct DcpHeader<'a> {
    frame_id: u16,
    service_type: u8,
    xid: u32,
    response_delay: u16,
    blocks: Reader<'a>,
}

fn parse_header<'a>(r: &mut Reader<'a>) -> CodecResult<DcpHeader<'a>> {
    let frame_id = r.u16()?;
    let service_id = r.u8()?;
    if service_id != DCP_SERVICE_IDENTIFY {
        return Err(CodecError::invalid("dcp service id", format!("{:#04x}", service_id)));
    }
    let service_type = r.u8()?;
    let xid = r.u32()?;
    let response_delay = r.u16()?;
    let data_len = r.u16()? as usize;
    if data_len > r.remaining() {
        return Err(CodecError::BadLength {
            what: "dcp data length",
            length: data_len,
        });
    }
    let blocks = r.sub(data_len, "dcp blocks")?;
    Ok(DcpHeader {
        frame_id,
        service_type,
        xid,
        response_delay,
        blocks,
    })
}

/// Iterate TLV blocks, calling `f(option, suboption, value)`
fn for_each_block<'a>(
    blocks: &mut Reader<'a>,
    mut f: impl FnMut(u8, u8, &'a [u8]) -> CodecResult<()>,
) -> CodecResult<()> {
    while blocks.remaining() >= 4 {
        let option = blocks.u8()?;
        let suboption = blocks.u8()?;
        let len = blocks.u16()? as usize;
        if len > blocks.remaining() {
            return Err(CodecError::BadLength {
                what: "dcp block",
                length: len,
            });
        }
        let value = blocks.take(len)?;
        if len % 2 == 1 && !blocks.is_empty() {
            blocks.skip(1)?;
        }
        f(option, suboption, value)?;
    }
    Ok(())
}

fn ascii(value: &[u8], field: &'static str) -> CodecResult<String> {
    let trimmed = match value.iter().rposition(|b| *b != 0) {
        Some(end) => &value[..=end],
        None => &[][..],
    };
    if !trimmed.is_ascii() {
        return Err(CodecError::invalid(field, "non-ASCII characters"));
    }
    Ok(String::from_utf8_lossy(trimmed).into_owned())
}

fn with_info<'a>(value: &'a [u8], min: usize, what: &'static str) -> CodecResult<Reader<'a>> {
    if value.len() < 2 + min {
        return Err(CodecError::BadLength {
            what,
            length: value.len(),
        });
    }
    let mut r = Reader::new(value, what);
    r.skip(2)?;
    Ok(r)
}

/// Parse an Identify response frame
///
/// Pure: the same bytes always produce the same device.
pub fn parse_identify_response(frame: &[u8]) -> CodecResult<IdentifyResponse> {
    let eth = parse_ethernet(frame)?;
    let mut r = Reader::new(eth.payload, "dcp response");
    let header = parse_header(&mut r)?;

    if !(FRAME_ID_DCP_IDENTIFY_RES_FIRST..=FRAME_ID_DCP_IDENTIFY_RES_LAST).contains(&header.frame_id) {
        return Err(CodecError::invalid(
            "dcp frame id",
            format!("{:#06x}", header.frame_id),
        ));
    }
    if header.service_type != DCP_SERVICE_TYPE_RESPONSE {
        return Err(CodecError::invalid(
            "dcp service type",
            format!("{:#04x}", header.service_type),
        ));
    }

    let mut device = DiscoveredDevice {
        mac: eth.src,
        ip: None,
        station_name: String::new(),
        vendor_name: String::new(),
        vendor_id: 0,
        device_id: 0,
        role: 0,
    };

    let mut blocks = header.blocks;
    for_each_block(&mut blocks, |option, suboption, value| {
        match (option, suboption) {
            (DCP_OPT_IP, DCP_SUB_IP_PARAMETER) => {
                let mut v = with_info(value, 12, "dcp ip block")?;
                let ip = Ipv4Addr::from(v.u32()?);
                let subnet = Ipv4Addr::from(v.u32()?);
                let gateway = Ipv4Addr::from(v.u32()?);
                if !ip.is_unspecified() {
                    device.ip = Some(IpSettings {
                        ip,
                        subnet,
                        gateway,
                    });
                }
            },
            (DCP_OPT_DEVICE, DCP_SUB_DEVICE_NAME) => {
                let mut v = with_info(value, 0, "dcp name block")?;
                device.station_name = ascii(v.rest(), "station name")?;
            },
            (DCP_OPT_DEVICE, DCP_SUB_DEVICE_VENDOR) => {
                let mut v = with_info(value, 0, "dcp vendor block")?;
                device.vendor_name = ascii(v.rest(), "vendor name")?;
            },
            (DCP_OPT_DEVICE, DCP_SUB_DEVICE_ID) => {
                let mut v = with_info(value, 4, "dcp id block")?;
                device.vendor_id = v.u16()?;
                device.device_id = v.u16()?;
            },
            (DCP_OPT_DEVICE, DCP_SUB_DEVICE_ROLE) => {
                let mut v = with_info(value, 2, "dcp role block")?;
                device.role = v.u16()?;
            },
            _ => {},
        }
        Ok(())
    })?;

    Ok(IdentifyResponse {
        xid: header.xid,
        device,
    })
}

/// Parse an Identify request frame
pub fn parse_identify_request(frame: &[u8]) -> CodecResult<IdentifyRequest> {
    let eth = parse_ethernet(frame)?;
    let mut r = Reader::new(eth.payload, "dcp request");
    let header = parse_header(&mut r)?;
    if header.frame_id != FRAME_ID_DCP_IDENTIFY_REQ
        || header.service_type != DCP_SERVICE_TYPE_REQUEST
    {
        return Err(CodecError::invalid(
            "dcp request",
            format!("frame id {:#06x}", header.frame_id),
        ));
    }

    let mut name_filter = None;
    let mut blocks = header.blocks;
    for_each_block(&mut blocks, |option, suboption, value| {
        if (option, suboption) == (DCP_OPT_DEVICE, DCP_SUB_DEVICE_NAME) {
            name_filter = Some(ascii(value, "station name")?);
        }
        Ok(())
    })?;

    Ok(IdentifyRequest {
        xid: header.xid,
        src: eth.src,
        response_delay: header.response_delay,
        name_filter,
    })
}

/// Send one Identify request and collect responses until `timeout`
///
/// Results are deduplicated by MAC (first response wins). Frames that are
/// not well-formed identify responses for this transaction are dropped.
pub async fn discover<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
    name_filter: Option<&str>,
) -> Result<Vec<DiscoveredDevice>, TransportError> {
    let xid: u32 = rand::random();
    let request = build_identify_request(&transport.local_mac(), xid, name_filter);
    trace!("DCP identify tx: {}", common::hex::dump(&request, 32));
    transport.send_frame(&request).await?;

    let deadline = Instant::now() + timeout;
    let mut seen = HashSet::new();
    let mut devices = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(frame) = transport.recv_frame(remaining).await? else {
            break;
        };
        let response = match parse_identify_response(&frame) {
            Ok(response) => response,
            Err(e) => {
                trace!("DCP drop: {}", e);
                continue;
            },
        };
        if response.xid != xid {
            continue;
        }
        if let Some(filter) = name_filter {
            if !response.device.station_name.eq_ignore_ascii_case(filter) {
                continue;
            }
        }
        if seen.insert(response.device.mac) {
            debug!(
                "DCP: {} @ {} ({:04X}:{:04X})",
                response.device.station_name,
                response.device.mac_string(),
                response.device.vendor_id,
                response.device.device_id
            );
            devices.push(response.device);
        }
    }

    Ok(devices)
}

/// Identify one station by name, returning on the first matching response
pub async fn identify_station<T: Transport + ?Sized>(
    transport: &mut T,
    station_name: &str,
    timeout: Duration,
) -> Result<Option<DiscoveredDevice>, TransportError> {
    let xid: u32 = rand::random();
    let request = build_identify_request(&transport.local_mac(), xid, Some(station_name));
    transport.send_frame(&request).await?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        let Some(frame) = transport.recv_frame(remaining).await? else {
            return Ok(None);
        };
        match parse_identify_response(&frame) {
            Ok(r) if r.xid == xid && r.device.station_name.eq_ignore_ascii_case(station_name) => {
                return Ok(Some(r.device));
            },
            Ok(_) => continue,
            Err(e) => trace!("DCP drop: {}", e),
        }
    }
}
