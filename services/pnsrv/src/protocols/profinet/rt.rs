//! Cyclic real-time frames (RT_CLASS_1)
//!
//! ```text
//! Ethernet | FrameID(2) | C_SDU (>= 40) | CycleCounter(2) DataStatus(1) TransferStatus(1)
//! ```
//!
//! Slot data inside the C_SDU:
//! - input frame:  per input slot `f32 BE | quality | IOPS`, then one IOCS per output slot
//! - output frame: per output slot `f32 BE | IOPS`, then one IOCS per input slot

use std::collections::{HashMap, HashSet};

use bytes::{BufMut, BytesMut};

use super::blocks::{
    DataDescription, ExpectedApi, ExpectedSubmodule, ExpectedSubmoduleBlock, IoDataObject,
    IocrApi, IocrType,
};
use super::codec::{ethernet_header, parse_ethernet, CodecError, CodecResult, Reader};
use super::constants::*;
use crate::core::config::{SlotConfig, SlotDirection};
use crate::core::devices::Quality;

/// Offsets of one slot inside its C_SDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOffsets {
    pub slot: u16,
    pub subslot: u16,
    pub data_offset: u16,
    pub data_length: u16,
    pub iops_offset: u16,
}

/// Frame layout derived from the configured slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoLayout {
    pub inputs: Vec<SlotOffsets>,
    pub outputs: Vec<SlotOffsets>,
    /// IOCS for output slots, carried in the input frame
    pub input_iocs: Vec<IoDataObject>,
    /// IOCS for input slots, carried in the output frame
    pub output_iocs: Vec<IoDataObject>,
    pub input_len: u16,
    pub output_len: u16,
}

fn place(slots: &[&SlotConfig], consumers: &[&SlotConfig]) -> (Vec<SlotOffsets>, Vec<IoDataObject>, u16) {
    let mut offset = 0u16;
    let mut placed = Vec::with_capacity(slots.len());
    for s in slots {
        let data_length = s.data_length();
        placed.push(SlotOffsets {
            slot: s.slot,
            subslot: s.subslot,
            data_offset: offset,
            data_length,
            iops_offset: offset + data_length,
        });
        offset += data_length + 1;
    }
    let mut iocs = Vec::with_capacity(consumers.len());
    for s in consumers {
        iocs.push(IoDataObject {
            slot: s.slot,
            subslot: s.subslot,
            frame_offset: offset,
        });
        offset += 1;
    }
    let len = (offset as usize).max(RT_MIN_C_SDU_LEN) as u16;
    (placed, iocs, len)
}

impl IoLayout {
    pub fn new(slots: &[SlotConfig]) -> Self {
        let inputs: Vec<&SlotConfig> = slots
            .iter()
            .filter(|s| s.direction == SlotDirection::Input)
            .collect();
        let outputs: Vec<&SlotConfig> = slots
            .iter()
            .filter(|s| s.direction == SlotDirection::Output)
            .collect();

        let (input_slots, input_iocs, input_len) = place(&inputs, &outputs);
        let (output_slots, output_iocs, output_len) = place(&outputs, &inputs);

        Self {
            inputs: input_slots,
            outputs: output_slots,
            input_iocs,
            output_iocs,
            input_len,
            output_len,
        }
    }

    /// IOCR API entry for the given direction
    pub fn iocr_api(&self, iocr_type: IocrType) -> IocrApi {
        let (slots, iocs) = match iocr_type {
            IocrType::Input => (&self.inputs, &self.input_iocs),
            IocrType::Output => (&self.outputs, &self.output_iocs),
        };
        IocrApi {
            api: API_DEFAULT,
            data_objects: slots
                .iter()
                .map(|s| IoDataObject {
                    slot: s.slot,
                    subslot: s.subslot,
                    frame_offset: s.data_offset,
                })
                .collect(),
            iocs: iocs.clone(),
        }
    }

    pub fn data_length(&self, iocr_type: IocrType) -> u16 {
        match iocr_type {
            IocrType::Input => self.input_len,
            IocrType::Output => self.output_len,
        }
    }

    pub fn has_output(&self, slot: u16) -> bool {
        self.outputs.iter().any(|s| s.slot == slot)
    }
}

/// ExpectedSubmoduleBlock with one API entry per configured slot
pub fn expected_submodules(slots: &[SlotConfig]) -> ExpectedSubmoduleBlock {
    ExpectedSubmoduleBlock {
        apis: slots
            .iter()
            .map(|s| {
                let (properties, direction) = match s.direction {
                    SlotDirection::Input => (0x0001, IOCR_TYPE_INPUT),
                    SlotDirection::Output => (0x0002, IOCR_TYPE_OUTPUT),
                };
                ExpectedApi {
                    api: API_DEFAULT,
                    slot: s.slot,
                    module_ident: s.module_ident,
                    module_properties: 0,
                    submodules: vec![ExpectedSubmodule {
                        subslot: s.subslot,
                        ident: s.submodule_ident,
                        properties,
                        data: vec![DataDescription {
                            direction,
                            length: s.data_length(),
                            length_iocs: 1,
                            length_iops: 1,
                        }],
                    }],
                }
            })
            .collect(),
    }
}

/// One cyclic frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtFrame {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub frame_id: u16,
    pub data: Vec<u8>,
    pub cycle_counter: u16,
    pub data_status: u8,
    pub transfer_status: u8,
}

impl RtFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(
            ETH_HEADER_LEN + 2 + self.data.len() + RT_APDU_STATUS_LEN,
        );
        ethernet_header(&mut buf, &self.dst, &self.src);
        buf.put_u16(self.frame_id);
        buf.put_slice(&self.data);
        buf.put_u16(self.cycle_counter);
        buf.put_u8(self.data_status);
        buf.put_u8(self.transfer_status);
        buf.to_vec()
    }

    pub fn decode(frame: &[u8]) -> CodecResult<Self> {
        let eth = parse_ethernet(frame)?;
        if eth.payload.len() < 2 + RT_APDU_STATUS_LEN {
            return Err(CodecError::Truncated {
                what: "rt frame",
                needed: 2 + RT_APDU_STATUS_LEN,
                available: eth.payload.len(),
            });
        }
        let mut r = Reader::new(eth.payload, "rt frame");
        let frame_id = r.u16()?;
        let data = r.take(r.remaining() - RT_APDU_STATUS_LEN)?.to_vec();
        Ok(Self {
            dst: eth.dst,
            src: eth.src,
            frame_id,
            data,
            cycle_counter: r.u16()?,
            data_status: r.u8()?,
            transfer_status: r.u8()?,
        })
    }

    /// DataValid, ProviderState RUN and no station problem
    pub fn data_status_ok(&self) -> bool {
        let required = DATA_STATUS_DATA_VALID | DATA_STATUS_PROVIDER_RUN | DATA_STATUS_STATION_OK;
        self.data_status & required == required
    }
}

/// Serial-number comparison of 16-bit cycle counters
pub fn is_newer(new: u16, last: u16) -> bool {
    (new.wrapping_sub(last) as i16) > 0
}

fn check_len(data: &[u8], expected: u16, what: &'static str) -> CodecResult<()> {
    if data.len() < expected as usize {
        return Err(CodecError::BadLength {
            what,
            length: data.len(),
        });
    }
    Ok(())
}

/// Decoded value of one input slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotValue {
    pub slot: u16,
    pub value: f32,
    pub quality: Quality,
}

/// Decode input slots from an input C_SDU
///
/// IOPS bad forces BAD; a DataStatus problem degrades anything else to UNCERTAIN.
pub fn decode_inputs(layout: &IoLayout, frame: &RtFrame) -> CodecResult<Vec<SlotValue>> {
    check_len(&frame.data, layout.input_len, "input c_sdu")?;
    let status_ok = frame.data_status_ok();
    let mut values = Vec::with_capacity(layout.inputs.len());
    for s in &layout.inputs {
        let at = s.data_offset as usize;
        let mut r = Reader::new(&frame.data[at..], "input slot");
        let value = r.f32()?;
        let code = r.u8()?;
        let iops = frame.data[s.iops_offset as usize];
        let quality = if iops & IOXS_GOOD == 0 {
            Quality::Bad
        } else {
            let q = Quality::from_code(code).unwrap_or(Quality::Bad);
            if q != Quality::Bad && !status_ok {
                Quality::Uncertain
            } else {
                q
            }
        };
        values.push(SlotValue {
            slot: s.slot,
            value,
            quality,
        });
    }
    Ok(values)
}

/// Build an output C_SDU; slots without a commanded value send 0.0
pub fn encode_outputs(layout: &IoLayout, values: &HashMap<u16, f32>) -> Vec<u8> {
    let mut data = vec![0u8; layout.output_len as usize];
    for s in &layout.outputs {
        let at = s.data_offset as usize;
        let v = values.get(&s.slot).copied().unwrap_or(0.0);
        data[at..at + 4].copy_from_slice(&v.to_be_bytes());
        data[s.iops_offset as usize] = IOXS_GOOD;
    }
    for c in &layout.output_iocs {
        data[c.frame_offset as usize] = IOXS_GOOD;
    }
    data
}

/// Build an input C_SDU the way a device does; `missing` slots report IOPS bad
pub fn encode_inputs(
    layout: &IoLayout,
    values: &HashMap<u16, (f32, Quality)>,
    missing: &HashSet<u16>,
) -> Vec<u8> {
    let mut data = vec![0u8; layout.input_len as usize];
    for s in &layout.inputs {
        let at = s.data_offset as usize;
        let (v, q) = values.get(&s.slot).copied().unwrap_or((0.0, Quality::Good));
        data[at..at + 4].copy_from_slice(&v.to_be_bytes());
        data[at + 4] = q.code();
        data[s.iops_offset as usize] = if missing.contains(&s.slot) {
            IOXS_BAD
        } else {
            IOXS_GOOD
        };
    }
    for c in &layout.input_iocs {
        data[c.frame_offset as usize] = IOXS_GOOD;
    }
    data
}

/// Decode output slots from an output C_SDU (device side)
pub fn decode_outputs(layout: &IoLayout, data: &[u8]) -> CodecResult<Vec<(u16, f32)>> {
    check_len(data, layout.output_len, "output c_sdu")?;
    layout
        .outputs
        .iter()
        .map(|s| {
            let mut r = Reader::new(&data[s.data_offset as usize..], "output slot");
            Ok((s.slot, r.f32()?))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn slots() -> Vec<SlotConfig> {
        vec![
            SlotConfig::input(1, 0x10, 0x11),
            SlotConfig::input(2, 0x10, 0x11),
            SlotConfig::output(3, 0x20, 0x21),
        ]
    }

    fn input_frame(layout: &IoLayout, data_status: u8, missing: &[u16]) -> RtFrame {
        let mut values = HashMap::new();
        values.insert(1, (12.5f32, Quality::Good));
        values.insert(2, (-3.0f32, Quality::Simulated));
        RtFrame {
            dst: [0x02, 0, 0, 0, 0, 1],
            src: [0x00, 0x0E, 0xCF, 0, 0, 1],
            frame_id: FRAME_ID_INPUT_DEFAULT,
            data: encode_inputs(layout, &values, &missing.iter().copied().collect()),
            cycle_counter: 1024,
            data_status,
            transfer_status: 0,
        }
    }

    #[test]
    fn test_layout_offsets() {
        let layout = IoLayout::new(&slots());
        assert_eq!(layout.inputs[0].data_offset, 0);
        assert_eq!(layout.inputs[0].iops_offset, 5);
        assert_eq!(layout.inputs[1].data_offset, 6);
        assert_eq!(layout.input_iocs[0].frame_offset, 12);
        assert_eq!(layout.outputs[0].iops_offset, 4);
        assert_eq!(layout.output_iocs.len(), 2);
        assert_eq!(layout.input_len as usize, RT_MIN_C_SDU_LEN);
        assert!(layout.has_output(3));
        assert!(!layout.has_output(1));
    }

    #[test]
    fn test_input_frame_decode() {
        let layout = IoLayout::new(&slots());
        let frame = input_frame(&layout, DATA_STATUS_DEFAULT, &[]);
        let decoded = RtFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);

        let values = decode_inputs(&layout, &decoded).unwrap();
        assert_eq!(values[0].value, 12.5);
        assert_eq!(values[0].quality, Quality::Good);
        assert_eq!(values[1].quality, Quality::Simulated);
    }

    #[test]
    fn test_iops_bad_forces_bad_quality() {
        let layout = IoLayout::new(&slots());
        let frame = input_frame(&layout, DATA_STATUS_DEFAULT, &[2]);
        let values = decode_inputs(&layout, &frame).unwrap();
        assert_eq!(values[0].quality, Quality::Good);
        assert_eq!(values[1].quality, Quality::Bad);
    }

    #[test]
    fn test_data_status_problem_gives_uncertain() {
        let layout = IoLayout::new(&slots());
        let status = DATA_STATUS_DEFAULT & !DATA_STATUS_STATION_OK;
        let frame = input_frame(&layout, status, &[]);
        let values = decode_inputs(&layout, &frame).unwrap();
        assert!(values.iter().all(|v| v.quality == Quality::Uncertain));
    }

    #[test]
    fn test_outputs_round_trip() {
        let layout = IoLayout::new(&slots());
        let mut values = HashMap::new();
        values.insert(3u16, 47.25f32);
        let data = encode_outputs(&layout, &values);
        assert_eq!(decode_outputs(&layout, &data).unwrap(), vec![(3, 47.25)]);
    }

    #[test]
    fn test_short_c_sdu_is_bad_length() {
        let layout = IoLayout::new(&slots());
        let mut frame = input_frame(&layout, DATA_STATUS_DEFAULT, &[]);
        frame.data.truncate(10);
        assert!(matches!(
            decode_inputs(&layout, &frame),
            Err(CodecError::BadLength { .. })
        ));
    }

    #[test]
    fn test_is_newer_wraps() {
        assert!(is_newer(1, 0));
        assert!(is_newer(0, 0xFFFF));
        assert!(!is_newer(5, 5));
        assert!(!is_newer(0xFFF0, 0x0010));
    }

    #[test]
    fn test_expected_block_per_slot() {
        let block = expected_submodules(&slots());
        assert_eq!(block.apis.len(), 3);
        assert_eq!(block.apis[2].submodules[0].data[0].direction, IOCR_TYPE_OUTPUT);
        assert_eq!(block.apis[0].submodules[0].data[0].length, INPUT_SLOT_DATA_LEN);
    }
}
