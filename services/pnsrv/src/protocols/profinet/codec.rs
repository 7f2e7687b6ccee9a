//! Byte-level helpers shared by the PROFINET encoders and decoders
//!
//! Everything on the wire is big-endian except the RPC header and NDR
//! arguments of little-endian peers, which use the `_le` readers.

use thiserror::Error;
use uuid::Uuid;

use super::constants::{ETHERTYPE_PROFINET, ETHERTYPE_VLAN, ETH_MIN_FRAME_LEN};

/// Classified decode failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated {what}: need {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("bad length field in {what}: {length}")]
    BadLength { what: &'static str, length: usize },

    #[error("invalid {field}: {detail}")]
    Invalid { field: &'static str, detail: String },
}

impl CodecError {
    pub fn invalid(field: &'static str, detail: impl Into<String>) -> Self {
        CodecError::Invalid {
            field,
            detail: detail.into(),
        }
    }
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Bounds-checked cursor over a received buffer
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                what: self.what,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> CodecResult<()> {
        self.take(n).map(|_| ())
    }

    /// Sub-reader over the next `n` bytes
    pub fn sub(&mut self, n: usize, what: &'static str) -> CodecResult<Reader<'a>> {
        Ok(Reader::new(self.take(n)?, what))
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> CodecResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> CodecResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u16_le(&mut self) -> CodecResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self) -> CodecResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32(&mut self) -> CodecResult<f32> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn mac(&mut self) -> CodecResult<[u8; 6]> {
        let b = self.take(6)?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(b);
        Ok(mac)
    }

    /// UUID in big-endian field order
    pub fn uuid(&mut self) -> CodecResult<Uuid> {
        let b = self.take(16)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(b);
        Ok(Uuid::from_bytes(bytes))
    }

    /// UUID with little-endian time fields
    pub fn uuid_le(&mut self) -> CodecResult<Uuid> {
        let b = self.take(16)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(b);
        Ok(Uuid::from_bytes_le(bytes))
    }
}

/// Parsed Ethernet II header with the PROFINET payload that follows it
#[derive(Debug, Clone)]
pub struct EthernetFrame<'a> {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub payload: &'a [u8],
}

/// Split an Ethernet frame carrying EtherType 0x8892, skipping one VLAN tag
pub fn parse_ethernet(frame: &[u8]) -> CodecResult<EthernetFrame<'_>> {
    let mut r = Reader::new(frame, "ethernet header");
    let dst = r.mac()?;
    let src = r.mac()?;
    let mut ethertype = r.u16()?;
    if ethertype == ETHERTYPE_VLAN {
        r.skip(2)?;
        ethertype = r.u16()?;
    }
    if ethertype != ETHERTYPE_PROFINET {
        return Err(CodecError::invalid(
            "ethertype",
            format!("{:#06x}", ethertype),
        ));
    }
    Ok(EthernetFrame {
        dst,
        src,
        payload: r.rest(),
    })
}

/// Start a frame with the Ethernet II header
pub fn ethernet_header(buf: &mut bytes::BytesMut, dst: &[u8; 6], src: &[u8; 6]) {
    use bytes::BufMut;
    buf.reserve(ETH_MIN_FRAME_LEN);
    buf.put_slice(dst);
    buf.put_slice(src);
    buf.put_u16(ETHERTYPE_PROFINET);
}

/// Pad to the Ethernet minimum and freeze
pub fn finish_frame(mut buf: bytes::BytesMut) -> Vec<u8> {
    if buf.len() < ETH_MIN_FRAME_LEN {
        buf.resize(ETH_MIN_FRAME_LEN, 0);
    }
    buf.to_vec()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_reader_truncated() {
        let mut r = Reader::new(&[0x01, 0x02, 0x03], "test");
        assert_eq!(r.u16().unwrap(), 0x0102);
        let err = r.u16().unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                what: "test",
                needed: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_parse_ethernet_vlan() {
        let frame = [
            0x01, 0x0E, 0xCF, 0x00, 0x00, 0x00, // dst
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src
            0x81, 0x00, 0x00, 0x00, // vlan
            0x88, 0x92, 0xFE, 0xFE,
        ];
        let eth = parse_ethernet(&frame).unwrap();
        assert_eq!(eth.src, [0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(eth.payload, &[0xFE, 0xFE]);
    }

    #[test]
    fn test_parse_ethernet_rejects_other_ethertype() {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x08, 0x00, 0x45]);
        assert!(matches!(
            parse_ethernet(&frame),
            Err(CodecError::Invalid { field: "ethertype", .. })
        ));
    }
}
