//! Cyclic I/O engine
//!
//! One call to [`CyclicEngine::run_cycle`] is one exchange: pending output
//! commands are folded into the output image, the output frame is sent and
//! the matching input frame is awaited for at most one cycle time. Frames
//! whose cycle counter is not newer than the last accepted one are dropped.

use std::collections::HashMap;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::connection::SessionParams;
use super::constants::DATA_STATUS_DEFAULT;
use super::rt::{decode_inputs, encode_outputs, is_newer, RtFrame, SlotValue};
use crate::core::transport::{Transport, TransportError};
use crate::error::{PnioError, Result};

/// Per-session cyclic counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CyclicStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Stale, duplicate or undecodable input frames
    pub frames_discarded: u64,
    pub cycles_missed: u64,
    pub commands_applied: u64,
}

/// Result of one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Input(Vec<SlotValue>),
    /// No valid input this cycle, still below the loss threshold
    Missed { consecutive: u32 },
    /// Threshold reached; the session is considered lost
    Lost { consecutive: u32 },
}

#[derive(Debug)]
pub struct CyclicEngine {
    transport: Box<dyn Transport>,
    params: SessionParams,
    threshold: u32,
    outputs: HashMap<u16, f32>,
    pending: HashMap<u16, f32>,
    tx_counter: u16,
    last_rx_counter: Option<u16>,
    missed: u32,
    stats: CyclicStats,
}

impl CyclicEngine {
    pub fn new(transport: Box<dyn Transport>, params: SessionParams, threshold: u32) -> Self {
        Self {
            transport,
            params,
            threshold: threshold.max(1),
            outputs: HashMap::new(),
            pending: HashMap::new(),
            tx_counter: 0,
            last_rx_counter: None,
            missed: 0,
            stats: CyclicStats::default(),
        }
    }

    /// Queue a value for the next outgoing frame; a later command for the
    /// same slot replaces an earlier one not yet sent
    pub fn queue_command(&mut self, slot: u16, value: f32) -> Result<()> {
        if !self.params.layout.has_output(slot) {
            return Err(PnioError::CommandError(format!(
                "slot {slot} is not an output slot"
            )));
        }
        if !value.is_finite() {
            return Err(PnioError::CommandError(format!(
                "slot {slot}: value must be finite"
            )));
        }
        self.pending.insert(slot, value);
        Ok(())
    }

    pub fn stats(&self) -> &CyclicStats {
        &self.stats
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn into_transport(self) -> Box<dyn Transport> {
        self.transport
    }

    fn output_frame(&mut self) -> Vec<u8> {
        self.tx_counter = self.tx_counter.wrapping_add(self.params.counter_step());
        RtFrame {
            dst: self.params.device_mac,
            src: self.transport.local_mac(),
            frame_id: self.params.output_frame_id,
            data: encode_outputs(&self.params.layout, &self.outputs),
            cycle_counter: self.tx_counter,
            data_status: DATA_STATUS_DEFAULT,
            transfer_status: 0,
        }
        .encode()
    }

    /// Run one exchange; transport errors end the session
    pub async fn run_cycle(&mut self) -> std::result::Result<CycleOutcome, TransportError> {
        let applied = self.pending.len() as u64;
        self.outputs.extend(self.pending.drain());
        self.stats.commands_applied += applied;

        let frame = self.output_frame();
        self.transport.send_frame(&frame).await?;
        self.stats.frames_sent += 1;

        let deadline = Instant::now() + self.params.cycle_time();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(raw) = self.transport.recv_frame(remaining).await? else {
                break;
            };
            let Ok(frame) = RtFrame::decode(&raw) else {
                continue;
            };
            if frame.frame_id != self.params.input_frame_id || frame.src != self.params.device_mac
            {
                continue;
            }
            if let Some(last) = self.last_rx_counter {
                if !is_newer(frame.cycle_counter, last) {
                    trace!(
                        "stale input frame: counter {} after {}",
                        frame.cycle_counter,
                        last
                    );
                    self.stats.frames_discarded += 1;
                    continue;
                }
            }
            match decode_inputs(&self.params.layout, &frame) {
                Ok(values) => {
                    self.last_rx_counter = Some(frame.cycle_counter);
                    self.missed = 0;
                    self.stats.frames_received += 1;
                    return Ok(CycleOutcome::Input(values));
                },
                Err(e) => {
                    debug!("input frame dropped: {}", e);
                    self.stats.frames_discarded += 1;
                },
            }
        }

        self.missed += 1;
        self.stats.cycles_missed += 1;
        if self.missed >= self.threshold {
            Ok(CycleOutcome::Lost {
                consecutive: self.missed,
            })
        } else {
            Ok(CycleOutcome::Missed {
                consecutive: self.missed,
            })
        }
    }
}
