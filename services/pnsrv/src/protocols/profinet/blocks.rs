//! PNIO connect and control blocks
//!
//! Every block starts with `BlockType(2) BlockLength(2) VersionHigh(1) VersionLow(1)`;
//! BlockLength counts from the version bytes to the end of the block. Decoders
//! read their fields and ignore trailing bytes, so blocks padded by a peer
//! (padding counted in BlockLength) decode the same. Unknown block types are
//! returned as [`Block::Unknown`].

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::codec::{CodecError, CodecResult, Reader};
use super::constants::*;

const BLOCK_VERSION_HIGH: u8 = 1;
const BLOCK_VERSION_LOW: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IocrType {
    Input,
    Output,
}

impl IocrType {
    pub fn as_u16(self) -> u16 {
        match self {
            IocrType::Input => IOCR_TYPE_INPUT,
            IocrType::Output => IOCR_TYPE_OUTPUT,
        }
    }

    pub fn from_u16(v: u16) -> CodecResult<Self> {
        match v {
            IOCR_TYPE_INPUT => Ok(IocrType::Input),
            IOCR_TYPE_OUTPUT => Ok(IocrType::Output),
            other => Err(CodecError::invalid("iocr type", format!("{:#06x}", other))),
        }
    }
}

/// Identity of the relationship: who the controller is and which AR it wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArBlockReq {
    pub ar_type: u16,
    pub ar_uuid: Uuid,
    pub session_key: u16,
    pub initiator_mac: [u8; 6],
    pub initiator_object: Uuid,
    pub ar_properties: u32,
    pub timeout_factor: u16,
    pub udp_rt_port: u16,
    pub station_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArBlockRes {
    pub ar_type: u16,
    pub ar_uuid: Uuid,
    pub session_key: u16,
    pub responder_mac: [u8; 6],
    pub udp_rt_port: u16,
}

/// Position of one submodule's data (or IOCS) inside a cyclic frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoDataObject {
    pub slot: u16,
    pub subslot: u16,
    pub frame_offset: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IocrApi {
    pub api: u32,
    pub data_objects: Vec<IoDataObject>,
    pub iocs: Vec<IoDataObject>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IocrBlockReq {
    pub iocr_type: IocrType,
    pub reference: u16,
    pub lt: u16,
    pub properties: u32,
    pub data_length: u16,
    pub frame_id: u16,
    pub send_clock_factor: u16,
    pub reduction_ratio: u16,
    pub phase: u16,
    pub sequence: u16,
    pub frame_send_offset: u32,
    pub watchdog_factor: u16,
    pub data_hold_factor: u16,
    pub tag_header: u16,
    pub multicast_mac: [u8; 6],
    pub apis: Vec<IocrApi>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IocrBlockRes {
    pub iocr_type: IocrType,
    pub reference: u16,
    pub frame_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmCrBlockReq {
    pub alarm_type: u16,
    pub lt: u16,
    pub properties: u32,
    pub rta_timeout_factor: u16,
    pub rta_retries: u16,
    pub local_alarm_reference: u16,
    pub max_alarm_data_length: u16,
    pub tag_header_high: u16,
    pub tag_header_low: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmCrBlockRes {
    pub alarm_type: u16,
    pub local_alarm_reference: u16,
    pub max_alarm_data_length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescription {
    /// 1 input, 2 output
    pub direction: u16,
    pub length: u16,
    pub length_iocs: u8,
    pub length_iops: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedSubmodule {
    pub subslot: u16,
    pub ident: u32,
    /// Bits 0-1: 0 no IO, 1 input, 2 output, 3 input and output
    pub properties: u16,
    pub data: Vec<DataDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedApi {
    pub api: u32,
    pub slot: u16,
    pub module_ident: u32,
    pub module_properties: u16,
    pub submodules: Vec<ExpectedSubmodule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedSubmoduleBlock {
    pub apis: Vec<ExpectedApi>,
}

/// Submodule state as reported in a ModuleDiffBlock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmoduleDiff {
    pub subslot: u16,
    pub ident: u32,
    pub state: u16,
}

impl SubmoduleDiff {
    /// IdentInfo, bits 11-14: 0 ok, 1 substitute, 2 wrong, 3 no submodule
    pub fn ident_info(&self) -> u16 {
        (self.state >> 11) & 0x0F
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDiff {
    pub slot: u16,
    pub ident: u32,
    /// 0 no module, 1 wrong module, 2 proper module, 3 substitute
    pub state: u16,
    pub submodules: Vec<SubmoduleDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDiffApi {
    pub api: u32,
    pub modules: Vec<ModuleDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDiffBlock {
    pub apis: Vec<ModuleDiffApi>,
}

/// IODControl / IOXControl / Release request and response bodies share a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    pub block_type: u16,
    pub ar_uuid: Uuid,
    pub session_key: u16,
    pub command: u16,
    pub properties: u16,
}

impl ControlBlock {
    pub fn prm_end(ar_uuid: Uuid, session_key: u16) -> Self {
        Self::new(BLOCK_IOD_CONTROL_REQ, ar_uuid, session_key, CONTROL_CMD_PRM_END)
    }

    pub fn application_ready(ar_uuid: Uuid, session_key: u16) -> Self {
        Self::new(
            BLOCK_IOX_CONTROL_REQ,
            ar_uuid,
            session_key,
            CONTROL_CMD_APPLICATION_READY,
        )
    }

    pub fn release(ar_uuid: Uuid, session_key: u16) -> Self {
        Self::new(BLOCK_RELEASE_REQ, ar_uuid, session_key, CONTROL_CMD_RELEASE)
    }

    pub fn new(block_type: u16, ar_uuid: Uuid, session_key: u16, command: u16) -> Self {
        Self {
            block_type,
            ar_uuid,
            session_key,
            command,
            properties: 0,
        }
    }

    /// The matching `Done` response (request type | 0x8000)
    pub fn done(&self) -> Self {
        Self {
            block_type: self.block_type | 0x8000,
            command: CONTROL_CMD_DONE,
            ..*self
        }
    }

    pub fn is_control_type(block_type: u16) -> bool {
        matches!(
            block_type & 0x7FFF,
            BLOCK_IOD_CONTROL_REQ | BLOCK_IOX_CONTROL_REQ | BLOCK_RELEASE_REQ
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    ArReq(ArBlockReq),
    ArRes(ArBlockRes),
    IocrReq(IocrBlockReq),
    IocrRes(IocrBlockRes),
    AlarmCrReq(AlarmCrBlockReq),
    AlarmCrRes(AlarmCrBlockRes),
    ExpectedSubmodule(ExpectedSubmoduleBlock),
    ModuleDiff(ModuleDiffBlock),
    Control(ControlBlock),
    Unknown { block_type: u16, body: Vec<u8> },
}

impl Block {
    pub fn block_type(&self) -> u16 {
        match self {
            Block::ArReq(_) => BLOCK_AR_REQ,
            Block::ArRes(_) => BLOCK_AR_RES,
            Block::IocrReq(_) => BLOCK_IOCR_REQ,
            Block::IocrRes(_) => BLOCK_IOCR_RES,
            Block::AlarmCrReq(_) => BLOCK_ALARM_CR_REQ,
            Block::AlarmCrRes(_) => BLOCK_ALARM_CR_RES,
            Block::ExpectedSubmodule(_) => BLOCK_EXPECTED_SUBMODULE_REQ,
            Block::ModuleDiff(_) => BLOCK_MODULE_DIFF,
            Block::Control(c) => c.block_type,
            Block::Unknown { block_type, .. } => *block_type,
        }
    }

    /// Append this block; with `align > 1` the block is zero-padded to a
    /// multiple of `align` bytes and the padding counted in BlockLength.
    pub fn encode_into(&self, buf: &mut BytesMut, align: usize) {
        let start = buf.len();
        buf.put_u16(self.block_type());
        buf.put_u16(0); // patched below
        buf.put_u8(BLOCK_VERSION_HIGH);
        buf.put_u8(BLOCK_VERSION_LOW);

        match self {
            Block::ArReq(b) => {
                buf.put_u16(b.ar_type);
                buf.put_slice(b.ar_uuid.as_bytes());
                buf.put_u16(b.session_key);
                buf.put_slice(&b.initiator_mac);
                buf.put_slice(b.initiator_object.as_bytes());
                buf.put_u32(b.ar_properties);
                buf.put_u16(b.timeout_factor);
                buf.put_u16(b.udp_rt_port);
                buf.put_u16(b.station_name.len() as u16);
                buf.put_slice(b.station_name.as_bytes());
            },
            Block::ArRes(b) => {
                buf.put_u16(b.ar_type);
                buf.put_slice(b.ar_uuid.as_bytes());
                buf.put_u16(b.session_key);
                buf.put_slice(&b.responder_mac);
                buf.put_u16(b.udp_rt_port);
            },
            Block::IocrReq(b) => {
                buf.put_u16(b.iocr_type.as_u16());
                buf.put_u16(b.reference);
                buf.put_u16(b.lt);
                buf.put_u32(b.properties);
                buf.put_u16(b.data_length);
                buf.put_u16(b.frame_id);
                buf.put_u16(b.send_clock_factor);
                buf.put_u16(b.reduction_ratio);
                buf.put_u16(b.phase);
                buf.put_u16(b.sequence);
                buf.put_u32(b.frame_send_offset);
                buf.put_u16(b.watchdog_factor);
                buf.put_u16(b.data_hold_factor);
                buf.put_u16(b.tag_header);
                buf.put_slice(&b.multicast_mac);
                buf.put_u16(b.apis.len() as u16);
                for api in &b.apis {
                    buf.put_u32(api.api);
                    for list in [&api.data_objects, &api.iocs] {
                        buf.put_u16(list.len() as u16);
                        for obj in list.iter() {
                            buf.put_u16(obj.slot);
                            buf.put_u16(obj.subslot);
                            buf.put_u16(obj.frame_offset);
                        }
                    }
                }
            },
            Block::IocrRes(b) => {
                buf.put_u16(b.iocr_type.as_u16());
                buf.put_u16(b.reference);
                buf.put_u16(b.frame_id);
            },
            Block::AlarmCrReq(b) => {
                buf.put_u16(b.alarm_type);
                buf.put_u16(b.lt);
                buf.put_u32(b.properties);
                buf.put_u16(b.rta_timeout_factor);
                buf.put_u16(b.rta_retries);
                buf.put_u16(b.local_alarm_reference);
                buf.put_u16(b.max_alarm_data_length);
                buf.put_u16(b.tag_header_high);
                buf.put_u16(b.tag_header_low);
            },
            Block::AlarmCrRes(b) => {
                buf.put_u16(b.alarm_type);
                buf.put_u16(b.local_alarm_reference);
                buf.put_u16(b.max_alarm_data_length);
            },
            Block::ExpectedSubmodule(b) => {
                buf.put_u16(b.apis.len() as u16);
                for api in &b.apis {
                    buf.put_u32(api.api);
                    buf.put_u16(api.slot);
                    buf.put_u32(api.module_ident);
                    buf.put_u16(api.module_properties);
                    buf.put_u16(api.submodules.len() as u16);
                    for sub in &api.submodules {
                        buf.put_u16(sub.subslot);
                        buf.put_u32(sub.ident);
                        buf.put_u16(sub.properties);
                        for d in &sub.data {
                            buf.put_u16(d.direction);
                            buf.put_u16(d.length);
                            buf.put_u8(d.length_iocs);
                            buf.put_u8(d.length_iops);
                        }
                    }
                }
            },
            Block::ModuleDiff(b) => {
                buf.put_u16(b.apis.len() as u16);
                for api in &b.apis {
                    buf.put_u32(api.api);
                    buf.put_u16(api.modules.len() as u16);
                    for module in &api.modules {
                        buf.put_u16(module.slot);
                        buf.put_u32(module.ident);
                        buf.put_u16(module.state);
                        buf.put_u16(module.submodules.len() as u16);
                        for sub in &module.submodules {
                            buf.put_u16(sub.subslot);
                            buf.put_u32(sub.ident);
                            buf.put_u16(sub.state);
                        }
                    }
                }
            },
            Block::Control(b) => {
                buf.put_u16(0); // reserved
                buf.put_slice(b.ar_uuid.as_bytes());
                buf.put_u16(b.session_key);
                buf.put_u16(0); // reserved
                buf.put_u16(b.command);
                buf.put_u16(b.properties);
            },
            Block::Unknown { body, .. } => {
                buf.put_slice(body);
            },
        }

        if align > 1 {
            let total = buf.len() - start;
            let padded = total.div_ceil(align) * align;
            buf.put_bytes(0, padded - total);
        }
        let length = (buf.len() - start - 4) as u16;
        buf[start + 2..start + 4].copy_from_slice(&length.to_be_bytes());
    }
}

/// Encode a sequence of blocks back to back
pub fn encode_blocks(blocks: &[Block], align: usize) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(256);
    for block in blocks {
        block.encode_into(&mut buf, align);
    }
    buf.to_vec()
}

/// Number of data descriptions implied by SubmoduleProperties
fn data_description_count(properties: u16) -> usize {
    match properties & 0x0003 {
        3 => 2,
        _ => 1,
    }
}

fn decode_body(block_type: u16, body: &mut Reader<'_>) -> CodecResult<Block> {
    let block = match block_type {
        BLOCK_AR_REQ => {
            let ar_type = body.u16()?;
            let ar_uuid = body.uuid()?;
            let session_key = body.u16()?;
            let initiator_mac = body.mac()?;
            let initiator_object = body.uuid()?;
            let ar_properties = body.u32()?;
            let timeout_factor = body.u16()?;
            let udp_rt_port = body.u16()?;
            let name_len = body.u16()? as usize;
            if name_len > body.remaining() {
                return Err(CodecError::BadLength {
                    what: "station name",
                    length: name_len,
                });
            }
            let station_name = String::from_utf8(body.take(name_len)?.to_vec())
                .map_err(|_| CodecError::invalid("station name", "not UTF-8"))?;
            Block::ArReq(ArBlockReq {
                ar_type,
                ar_uuid,
                session_key,
                initiator_mac,
                initiator_object,
                ar_properties,
                timeout_factor,
                udp_rt_port,
                station_name,
            })
        },
        BLOCK_AR_RES => Block::ArRes(ArBlockRes {
            ar_type: body.u16()?,
            ar_uuid: body.uuid()?,
            session_key: body.u16()?,
            responder_mac: body.mac()?,
            udp_rt_port: body.u16()?,
        }),
        BLOCK_IOCR_REQ => {
            let iocr_type = IocrType::from_u16(body.u16()?)?;
            let reference = body.u16()?;
            let lt = body.u16()?;
            let properties = body.u32()?;
            let data_length = body.u16()?;
            let frame_id = body.u16()?;
            let send_clock_factor = body.u16()?;
            let reduction_ratio = body.u16()?;
            let phase = body.u16()?;
            let sequence = body.u16()?;
            let frame_send_offset = body.u32()?;
            let watchdog_factor = body.u16()?;
            let data_hold_factor = body.u16()?;
            let tag_header = body.u16()?;
            let multicast_mac = body.mac()?;
            let api_count = body.u16()?;
            let mut apis = Vec::with_capacity(api_count as usize);
            for _ in 0..api_count {
                let api = body.u32()?;
                let mut lists: [Vec<IoDataObject>; 2] = [Vec::new(), Vec::new()];
                for list in lists.iter_mut() {
                    let count = body.u16()?;
                    for _ in 0..count {
                        list.push(IoDataObject {
                            slot: body.u16()?,
                            subslot: body.u16()?,
                            frame_offset: body.u16()?,
                        });
                    }
                }
                let [data_objects, iocs] = lists;
                apis.push(IocrApi {
                    api,
                    data_objects,
                    iocs,
                });
            }
            Block::IocrReq(IocrBlockReq {
                iocr_type,
                reference,
                lt,
                properties,
                data_length,
                frame_id,
                send_clock_factor,
                reduction_ratio,
                phase,
                sequence,
                frame_send_offset,
                watchdog_factor,
                data_hold_factor,
                tag_header,
                multicast_mac,
                apis,
            })
        },
        BLOCK_IOCR_RES => Block::IocrRes(IocrBlockRes {
            iocr_type: IocrType::from_u16(body.u16()?)?,
            reference: body.u16()?,
            frame_id: body.u16()?,
        }),
        BLOCK_ALARM_CR_REQ => Block::AlarmCrReq(AlarmCrBlockReq {
            alarm_type: body.u16()?,
            lt: body.u16()?,
            properties: body.u32()?,
            rta_timeout_factor: body.u16()?,
            rta_retries: body.u16()?,
            local_alarm_reference: body.u16()?,
            max_alarm_data_length: body.u16()?,
            tag_header_high: body.u16()?,
            tag_header_low: body.u16()?,
        }),
        BLOCK_ALARM_CR_RES => Block::AlarmCrRes(AlarmCrBlockRes {
            alarm_type: body.u16()?,
            local_alarm_reference: body.u16()?,
            max_alarm_data_length: body.u16()?,
        }),
        BLOCK_EXPECTED_SUBMODULE_REQ => {
            let api_count = body.u16()?;
            let mut apis = Vec::with_capacity(api_count as usize);
            for _ in 0..api_count {
                let api = body.u32()?;
                let slot = body.u16()?;
                let module_ident = body.u32()?;
                let module_properties = body.u16()?;
                let sub_count = body.u16()?;
                let mut submodules = Vec::with_capacity(sub_count as usize);
                for _ in 0..sub_count {
                    let subslot = body.u16()?;
                    let ident = body.u32()?;
                    let properties = body.u16()?;
                    let mut data = Vec::with_capacity(2);
                    for _ in 0..data_description_count(properties) {
                        data.push(DataDescription {
                            direction: body.u16()?,
                            length: body.u16()?,
                            length_iocs: body.u8()?,
                            length_iops: body.u8()?,
                        });
                    }
                    submodules.push(ExpectedSubmodule {
                        subslot,
                        ident,
                        properties,
                        data,
                    });
                }
                apis.push(ExpectedApi {
                    api,
                    slot,
                    module_ident,
                    module_properties,
                    submodules,
                });
            }
            Block::ExpectedSubmodule(ExpectedSubmoduleBlock { apis })
        },
        BLOCK_MODULE_DIFF => {
            let api_count = body.u16()?;
            let mut apis = Vec::with_capacity(api_count as usize);
            for _ in 0..api_count {
                let api = body.u32()?;
                let module_count = body.u16()?;
                let mut modules = Vec::with_capacity(module_count as usize);
                for _ in 0..module_count {
                    let slot = body.u16()?;
                    let ident = body.u32()?;
                    let state = body.u16()?;
                    let sub_count = body.u16()?;
                    let mut submodules = Vec::with_capacity(sub_count as usize);
                    for _ in 0..sub_count {
                        submodules.push(SubmoduleDiff {
                            subslot: body.u16()?,
                            ident: body.u32()?,
                            state: body.u16()?,
                        });
                    }
                    modules.push(ModuleDiff {
                        slot,
                        ident,
                        state,
                        submodules,
                    });
                }
                apis.push(ModuleDiffApi { api, modules });
            }
            Block::ModuleDiff(ModuleDiffBlock { apis })
        },
        t if ControlBlock::is_control_type(t) => {
            body.skip(2)?;
            let ar_uuid = body.uuid()?;
            let session_key = body.u16()?;
            body.skip(2)?;
            Block::Control(ControlBlock {
                block_type: t,
                ar_uuid,
                session_key,
                command: body.u16()?,
                properties: body.u16()?,
            })
        },
        other => Block::Unknown {
            block_type: other,
            body: body.rest().to_vec(),
        },
    };
    Ok(block)
}

/// Decode back-to-back blocks
pub fn decode_blocks(buf: &[u8]) -> CodecResult<Vec<Block>> {
    let mut r = Reader::new(buf, "block header");
    let mut blocks = Vec::new();
    while !r.is_empty() {
        let block_type = r.u16()?;
        let length = r.u16()? as usize;
        if length < 2 || length > r.remaining() {
            return Err(CodecError::BadLength {
                what: "block length",
                length,
            });
        }
        let mut body = r.sub(length, "block body")?;
        body.skip(2)?; // version
        blocks.push(decode_body(block_type, &mut body)?);
    }
    Ok(blocks)
}
