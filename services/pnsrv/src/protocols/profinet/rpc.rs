//! Connectionless DCE-RPC v4 envelope carrying PNIO connect/control blocks
//!
//! ```text
//! RPC header (80 bytes) | NDR args (20 bytes) | blocks (ArgsLength bytes)
//! NDR request : ArgsMaximum  ArgsLength MaximumCount Offset ActualCount
//! NDR response: PNIOStatus   ArgsLength MaximumCount Offset ActualCount
//! ```
//!
//! Requests are always encoded big-endian (drep 0x00); decoding also accepts
//! little-endian peers (drep 0x10).

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::codec::{CodecError, CodecResult, Reader};
use super::constants::PNIO_OBJECT_UUID_PREFIX;

pub const RPC_HEADER_LEN: usize = 80;
pub const NDR_HEADER_LEN: usize = 20;
pub const RPC_VERSION: u8 = 4;
pub const RPC_ARGS_MAXIMUM: u32 = 16384;

const FLAGS1_LAST_FRAGMENT: u8 = 0x02;
const FLAGS1_NO_FACK: u8 = 0x08;
const FLAGS1_IDEMPOTENT: u8 = 0x20;
const DREP_LITTLE_ENDIAN: u8 = 0x10;
const HINT_NONE: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Request,
    Response,
    Fault,
    Reject,
    Other(u8),
}

impl PacketType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => PacketType::Request,
            2 => PacketType::Response,
            3 => PacketType::Fault,
            6 => PacketType::Reject,
            other => PacketType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            PacketType::Request => 0,
            PacketType::Response => 2,
            PacketType::Fault => 3,
            PacketType::Reject => 6,
            PacketType::Other(v) => v,
        }
    }
}

/// PNIO status: ErrorCode, ErrorDecode, ErrorCode1, ErrorCode2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PnioStatus {
    pub code: u8,
    pub decode: u8,
    pub code1: u8,
    pub code2: u8,
}

impl PnioStatus {
    pub const OK: PnioStatus = PnioStatus::new(0, 0, 0, 0);

    pub const fn new(code: u8, decode: u8, code1: u8, code2: u8) -> Self {
        Self {
            code,
            decode,
            code1,
            code2,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }

    pub fn from_u32(v: u32) -> Self {
        let b = v.to_be_bytes();
        Self::new(b[0], b[1], b[2], b[3])
    }

    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes([self.code, self.decode, self.code1, self.code2])
    }
}

impl fmt::Display for PnioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.as_u32())
    }
}

/// PNIO object UUID: `DEA00000-6C97-11D1-8271-{instance}{device}{vendor}`
pub fn object_uuid(instance: u16, device_id: u16, vendor_id: u16) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[..10].copy_from_slice(&PNIO_OBJECT_UUID_PREFIX);
    bytes[10..12].copy_from_slice(&instance.to_be_bytes());
    bytes[12..14].copy_from_slice(&device_id.to_be_bytes());
    bytes[14..16].copy_from_slice(&vendor_id.to_be_bytes());
    Uuid::from_bytes(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcHeader {
    pub packet_type: PacketType,
    pub object: Uuid,
    pub interface: Uuid,
    pub activity: Uuid,
    pub server_boot: u32,
    pub interface_version: u32,
    pub sequence: u32,
    pub opnum: u16,
    pub fragment_num: u16,
}

/// One RPC datagram with its NDR arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcMessage {
    pub header: RpcHeader,
    /// Only meaningful on responses, faults and rejects
    pub status: PnioStatus,
    /// Only meaningful on requests
    pub args_maximum: u32,
    /// Encoded blocks
    pub payload: Vec<u8>,
}

impl RpcMessage {
    pub fn request(
        opnum: u16,
        object: Uuid,
        interface: Uuid,
        activity: Uuid,
        sequence: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            header: RpcHeader {
                packet_type: PacketType::Request,
                object,
                interface,
                activity,
                server_boot: 0,
                interface_version: 1,
                sequence,
                opnum,
                fragment_num: 0,
            },
            status: PnioStatus::OK,
            args_maximum: RPC_ARGS_MAXIMUM,
            payload,
        }
    }

    /// Response to this request, echoing its identifiers
    pub fn response(&self, status: PnioStatus, payload: Vec<u8>) -> Self {
        Self {
            header: RpcHeader {
                packet_type: PacketType::Response,
                ..self.header.clone()
            },
            status,
            args_maximum: 0,
            payload,
        }
    }

    pub fn is_request(&self) -> bool {
        self.header.packet_type == PacketType::Request
    }

    /// Response to the request identified by `activity`/`sequence`
    pub fn answers(&self, activity: &Uuid, sequence: u32) -> bool {
        !self.is_request() && self.header.activity == *activity && self.header.sequence == sequence
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = NDR_HEADER_LEN + self.payload.len();
        let mut buf = BytesMut::with_capacity(RPC_HEADER_LEN + body_len);
        let h = &self.header;

        buf.put_u8(RPC_VERSION);
        buf.put_u8(h.packet_type.as_u8());
        buf.put_u8(match h.packet_type {
            PacketType::Request => FLAGS1_IDEMPOTENT | FLAGS1_LAST_FRAGMENT,
            _ => FLAGS1_LAST_FRAGMENT | FLAGS1_NO_FACK,
        });
        buf.put_u8(0); // flags2
        buf.put_slice(&[0x00, 0x00, 0x00]); // drep: big-endian, ASCII, IEEE
        buf.put_u8(0); // serial high
        buf.put_slice(h.object.as_bytes());
        buf.put_slice(h.interface.as_bytes());
        buf.put_slice(h.activity.as_bytes());
        buf.put_u32(h.server_boot);
        buf.put_u32(h.interface_version);
        buf.put_u32(h.sequence);
        buf.put_u16(h.opnum);
        buf.put_u16(HINT_NONE);
        buf.put_u16(HINT_NONE);
        buf.put_u16(body_len as u16);
        buf.put_u16(h.fragment_num);
        buf.put_u8(0); // auth protocol
        buf.put_u8(0); // serial low

        let len = self.payload.len() as u32;
        if self.is_request() {
            buf.put_u32(self.args_maximum);
        } else {
            buf.put_u32(self.status.as_u32());
        }
        buf.put_u32(len); // ArgsLength
        buf.put_u32(if self.is_request() { self.args_maximum } else { len }); // MaximumCount
        buf.put_u32(0); // Offset
        buf.put_u32(len); // ActualCount
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    pub fn decode(datagram: &[u8]) -> CodecResult<Self> {
        let mut r = Reader::new(datagram, "rpc header");
        let version = r.u8()?;
        if version != RPC_VERSION {
            return Err(CodecError::invalid("rpc version", version.to_string()));
        }
        let packet_type = PacketType::from_u8(r.u8()?);
        r.skip(2)?; // flags
        let drep = r.take(3)?;
        let little = drep[0] & 0xF0 == DREP_LITTLE_ENDIAN;
        r.skip(1)?; // serial high

        let object = read_uuid(&mut r, little)?;
        let interface = read_uuid(&mut r, little)?;
        let activity = read_uuid(&mut r, little)?;

        let server_boot = read_u32(&mut r, little)?;
        let interface_version = read_u32(&mut r, little)?;
        let sequence = read_u32(&mut r, little)?;
        let opnum = read_u16(&mut r, little)?;
        r.skip(4)?; // hints
        let body_len = read_u16(&mut r, little)? as usize;
        let fragment_num = read_u16(&mut r, little)?;
        r.skip(2)?; // auth protocol, serial low

        if body_len > r.remaining() {
            return Err(CodecError::BadLength {
                what: "rpc fragment length",
                length: body_len,
            });
        }
        let mut body = r.sub(body_len, "rpc body")?;

        let header = RpcHeader {
            packet_type,
            object,
            interface,
            activity,
            server_boot,
            interface_version,
            sequence,
            opnum,
            fragment_num,
        };

        match packet_type {
            PacketType::Request | PacketType::Response => {
                let first = body.take(4)?;
                let first = [first[0], first[1], first[2], first[3]];
                let args_len = read_u32(&mut body, little)? as usize;
                body.skip(8)?; // MaximumCount, Offset
                let actual = read_u32(&mut body, little)? as usize;
                if args_len > body.remaining() || actual > args_len {
                    return Err(CodecError::BadLength {
                        what: "ndr args length",
                        length: args_len,
                    });
                }
                let payload = body.take(args_len)?.to_vec();
                let (status, args_maximum) = if packet_type == PacketType::Request {
                    let max = if little {
                        u32::from_le_bytes(first)
                    } else {
                        u32::from_be_bytes(first)
                    };
                    (PnioStatus::OK, max)
                } else {
                    (PnioStatus::new(first[0], first[1], first[2], first[3]), 0)
                };
                Ok(Self {
                    header,
                    status,
                    args_maximum,
                    payload,
                })
            },
            _ => {
                // Fault / reject bodies carry a single status word
                let status = if body.remaining() >= 4 {
                    PnioStatus::from_u32(read_u32(&mut body, little)?)
                } else {
                    PnioStatus::default()
                };
                Ok(Self {
                    header,
                    status,
                    args_maximum: 0,
                    payload: Vec::new(),
                })
            },
        }
    }
}

fn read_uuid(r: &mut Reader<'_>, little: bool) -> CodecResult<Uuid> {
    if little {
        r.uuid_le()
    } else {
        r.uuid()
    }
}

fn read_u32(r: &mut Reader<'_>, little: bool) -> CodecResult<u32> {
    if little {
        r.u32_le()
    } else {
        r.u32()
    }
}

fn read_u16(r: &mut Reader<'_>, little: bool) -> CodecResult<u16> {
    if little {
        r.u16_le()
    } else {
        r.u16()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::protocols::profinet::constants::{PNIO_DEVICE_INTERFACE, RPC_OPNUM_CONNECT};

    fn sample_request() -> RpcMessage {
        RpcMessage::request(
            RPC_OPNUM_CONNECT,
            object_uuid(1, 0x0001, 0x0493),
            Uuid::from_bytes(PNIO_DEVICE_INTERFACE),
            Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0),
            7,
            vec![0x01, 0x01, 0x00, 0x02, 0x01, 0x00],
        )
    }

    #[test]
    fn test_object_uuid_layout() {
        let uuid = object_uuid(1, 0x0001, 0x0493);
        assert_eq!(
            uuid.to_string(),
            "dea00000-6c97-11d1-8271-000100010493"
        );
    }

    #[test]
    fn test_request_header_layout() {
        let bytes = sample_request().encode();
        assert_eq!(bytes.len(), RPC_HEADER_LEN + NDR_HEADER_LEN + 6);
        assert_eq!(bytes[0], 4);
        assert_eq!(bytes[1], 0);
        assert_eq!(&bytes[4..7], &[0, 0, 0]);
        assert_eq!(&bytes[24..28], &[0xDE, 0xA0, 0x00, 0x01]);
        // fragment length covers NDR header and blocks
        assert_eq!(&bytes[74..76], &[0x00, 26]);
        // ArgsLength
        assert_eq!(&bytes[84..88], &[0, 0, 0, 6]);
    }

    #[test]
    fn test_request_response_round_trip() {
        let request = sample_request();
        let decoded = RpcMessage::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);

        let response = request.response(PnioStatus::new(0xDB, 0x81, 0x40, 0x01), vec![]);
        let decoded = RpcMessage::decode(&response.encode()).unwrap();
        assert_eq!(decoded.status.to_string(), "DB814001");
        assert!(decoded.answers(&request.header.activity, 7));
        assert!(!decoded.answers(&request.header.activity, 8));
    }

    #[test]
    fn test_decode_little_endian_peer() {
        let request = sample_request();
        let mut bytes = request.encode();
        bytes[4] = DREP_LITTLE_ENDIAN;
        // Re-encode the multi-byte fields little-endian
        bytes[8..24].copy_from_slice(&request.header.object.to_bytes_le());
        bytes[24..40].copy_from_slice(&request.header.interface.to_bytes_le());
        bytes[40..56].copy_from_slice(&request.header.activity.to_bytes_le());
        bytes[64..68].copy_from_slice(&7u32.to_le_bytes());
        bytes[74..76].copy_from_slice(&26u16.to_le_bytes());
        bytes[80..84].copy_from_slice(&RPC_ARGS_MAXIMUM.to_le_bytes());
        bytes[84..88].copy_from_slice(&6u32.to_le_bytes());
        bytes[88..92].copy_from_slice(&RPC_ARGS_MAXIMUM.to_le_bytes());
        bytes[96..100].copy_from_slice(&6u32.to_le_bytes());
        // interface version 1
        bytes[60..64].copy_from_slice(&1u32.to_le_bytes());

        let decoded = RpcMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.header.object, request.header.object);
        assert_eq!(decoded.header.sequence, 7);
        assert_eq!(decoded.payload, request.payload);
    }

    #[test]
    fn test_bad_fragment_length() {
        let mut bytes = sample_request().encode();
        bytes[74..76].copy_from_slice(&500u16.to_be_bytes());
        assert!(matches!(
            RpcMessage::decode(&bytes),
            Err(CodecError::BadLength { .. })
        ));
    }
}
