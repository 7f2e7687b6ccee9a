//! Mock Transport for Testing
//!
//! An in-process network of simulated RTUs. Every [`MockTransport`] sees
//! the DCP answers of all devices on the [`MockNetwork`]; RPC and cyclic
//! frames go to the device whose IP the transport was opened for.
//!
//! [`SimulatedRtu`] implements the device side of Connect, parameter end,
//! application ready, release and cyclic data exchange, with switches to
//! inject the faults the controller has to cope with.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use super::traits::{DeviceEndpoint, Transport, TransportError, TransportFactory, TransportStats};
use crate::core::config::{parse_mac, DeviceConfig, SlotConfig};
use crate::core::devices::Quality;
use crate::protocols::profinet::blocks::{
    decode_blocks, encode_blocks, AlarmCrBlockRes, ArBlockRes, Block, ControlBlock,
    IocrBlockRes, IocrType, ModuleDiff, ModuleDiffApi, ModuleDiffBlock,
};
use crate::protocols::profinet::constants::*;
use crate::protocols::profinet::dcp::{
    build_identify_response, parse_identify_request, DiscoveredDevice, IpSettings,
};
use crate::protocols::profinet::rpc::{object_uuid, PnioStatus, RpcMessage};
use crate::protocols::profinet::rt::{decode_outputs, encode_inputs, IoLayout, RtFrame};

/// Locally administered MAC used by mock controllers
pub const MOCK_CONTROLLER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

/// Status a device returns for a block layout it cannot parse
pub const STATUS_FORMAT_NOT_SUPPORTED: PnioStatus = PnioStatus::new(0xDB, 0x81, 0x40, 0x01);
/// IOCR block rejected for its timing parameters
pub const STATUS_TIMING_REJECTED: PnioStatus = PnioStatus::new(0xDB, 0x81, 0x02, 0x0A);
const STATUS_STATE_CONFLICT: PnioStatus = PnioStatus::new(0xDB, 0x81, 0x40, 0x06);

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Default)]
struct NetworkInner {
    devices: Mutex<Vec<SimulatedRtu>>,
    live: AtomicUsize,
    opened: AtomicUsize,
    open_failure: Mutex<Option<TransportError>>,
}

/// Shared medium connecting mock transports and simulated devices
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    inner: Arc<NetworkInner>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: SimulatedRtu) {
        self.inner.devices.lock().push(device);
    }

    pub fn device(&self, station_name: &str) -> Option<SimulatedRtu> {
        self.inner
            .devices
            .lock()
            .iter()
            .find(|d| d.station_name() == station_name)
            .cloned()
    }

    fn device_by_ip(&self, ip: Ipv4Addr) -> Option<SimulatedRtu> {
        self.inner
            .devices
            .lock()
            .iter()
            .find(|d| d.ip() == ip)
            .cloned()
    }

    fn devices(&self) -> Vec<SimulatedRtu> {
        self.inner.devices.lock().clone()
    }

    /// Transports opened and not yet closed or dropped
    pub fn live_transports(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Transports opened since the network was created
    pub fn opened_transports(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Make every following open fail with `error`
    pub fn fail_opens(&self, error: Option<TransportError>) {
        *self.inner.open_failure.lock() = error;
    }

    pub fn factory(&self) -> MockTransportFactory {
        MockTransportFactory {
            network: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockTransportFactory {
    network: MockNetwork,
}

impl MockTransportFactory {
    fn open(&self, name: String, target: Option<SimulatedRtu>) -> Result<MockTransport, TransportError> {
        if let Some(err) = self.network.inner.open_failure.lock().clone() {
            return Err(err);
        }
        self.network.inner.live.fetch_add(1, Ordering::SeqCst);
        self.network.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransport {
            name,
            network: self.network.clone(),
            target,
            frames: VecDeque::new(),
            rpcs: VecDeque::new(),
            open: true,
            stats: TransportStats::new(),
        })
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn open_link(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(self.open("mock/dcp".to_string(), None)?))
    }

    async fn open_device(
        &self,
        endpoint: &DeviceEndpoint,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let target = self.network.device_by_ip(endpoint.ip);
        Ok(Box::new(self.open(
            format!("mock/{}", endpoint.station_name),
            target,
        )?))
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Mock transport bound to one (possibly absent) simulated device
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    network: MockNetwork,
    target: Option<SimulatedRtu>,
    frames: VecDeque<Vec<u8>>,
    rpcs: VecDeque<Vec<u8>>,
    open: bool,
    stats: TransportStats,
}

impl MockTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn shut(&mut self) {
        if self.open {
            self.open = false;
            self.network.inner.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn pop(
        queue: &mut VecDeque<Vec<u8>>,
        timeout: Duration,
    ) -> Option<Vec<u8>> {
        match queue.pop_front() {
            Some(data) => Some(data),
            None => {
                // Nothing is produced while we wait; answers only follow sends
                tokio::time::sleep(timeout).await;
                None
            },
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.shut();
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_mac(&self) -> [u8; 6] {
        MOCK_CONTROLLER_MAC
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.stats.record_frame_sent(frame.len());

        if let Ok(request) = parse_identify_request(frame) {
            for device in self.network.devices() {
                if let Some(answer) = device.answer_identify(&request.src, request.xid, request.name_filter.as_deref()) {
                    self.frames.push_back(answer);
                }
            }
            return Ok(());
        }
        if let Some(target) = &self.target {
            self.frames.extend(target.handle_output(frame));
        }
        Ok(())
    }

    async fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        self.ensure_open()?;
        let frame = Self::pop(&mut self.frames, timeout).await;
        if let Some(f) = &frame {
            self.stats.record_frame_received(f.len());
        }
        Ok(frame)
    }

    async fn send_rpc(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let target = self.target.as_ref().ok_or_else(|| {
            TransportError::Unsupported("RPC on a link-only transport".to_string())
        })?;
        self.stats.record_datagram_sent(datagram.len());
        let answers = target.handle_rpc(datagram);
        self.rpcs.extend(answers);
        Ok(())
    }

    async fn recv_rpc(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        self.ensure_open()?;
        let datagram = Self::pop(&mut self.rpcs, timeout).await;
        if let Some(d) = &datagram {
            self.stats.record_datagram_received(d.len());
        }
        Ok(datagram)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.open {
            debug!("{}: transport closed", self.name);
        }
        self.shut();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

// ============================================================================
// Simulated device
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct DeviceAr {
    ar_uuid: Uuid,
    session_key: u16,
    input_frame_id: u16,
    output_frame_id: u16,
    reduction_ratio: u16,
    parameterized: bool,
    application_ready: bool,
}

#[derive(Debug)]
struct RtuState {
    identity: DiscoveredDevice,
    instance: u16,
    slots: Vec<SlotConfig>,
    layout: IoLayout,
    inputs: HashMap<u16, (f32, Quality)>,
    outputs: HashMap<u16, f32>,
    missing: HashSet<u16>,
    ar: Option<DeviceAr>,
    cycle_counter: u16,

    connect_requests: u32,
    releases: u32,
    outputs_received: u64,

    require_vendor_format: bool,
    reject_status: Option<PnioStatus>,
    min_reduction_ratio: u16,
    hold_connect: bool,
    silent: bool,
    drop_inputs: u32,
    send_duplicates: bool,
}

/// Device-side protocol simulator
#[derive(Debug, Clone)]
pub struct SimulatedRtu {
    state: Arc<Mutex<RtuState>>,
}

impl SimulatedRtu {
    pub fn new(station_name: &str, mac: [u8; 6], ip: Ipv4Addr, slots: Vec<SlotConfig>) -> Self {
        let identity = DiscoveredDevice {
            mac,
            ip: Some(IpSettings {
                ip,
                subnet: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Ipv4Addr::UNSPECIFIED,
            }),
            station_name: station_name.to_string(),
            vendor_name: "Simulated RTU".to_string(),
            vendor_id: 0x0493,
            device_id: 0x0001,
            role: 0x0001,
        };
        let layout = IoLayout::new(&slots);
        Self {
            state: Arc::new(Mutex::new(RtuState {
                identity,
                instance: 1,
                slots,
                layout,
                inputs: HashMap::new(),
                outputs: HashMap::new(),
                missing: HashSet::new(),
                ar: None,
                cycle_counter: 0,
                connect_requests: 0,
                releases: 0,
                outputs_received: 0,
                require_vendor_format: false,
                reject_status: None,
                min_reduction_ratio: 1,
                hold_connect: false,
                silent: false,
                drop_inputs: 0,
                send_duplicates: false,
            })),
        }
    }

    /// Device matching a configured entry; the MAC is derived from the IP when not configured
    pub fn from_config(device: &DeviceConfig) -> Self {
        let octets = device.ip.octets();
        let mac = device
            .mac
            .as_deref()
            .and_then(parse_mac)
            .unwrap_or([0x00, 0x0E, 0xCF, octets[1], octets[2], octets[3]]);
        let rtu = Self::new(&device.station_name, mac, device.ip, device.slots.clone());
        {
            let mut s = rtu.state.lock();
            s.identity.vendor_id = device.vendor_id;
            s.identity.device_id = device.device_id;
            s.instance = device.instance;
        }
        rtu
    }

    pub fn station_name(&self) -> String {
        self.state.lock().identity.station_name.clone()
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.state
            .lock()
            .identity
            .ip
            .map(|s| s.ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    pub fn mac(&self) -> [u8; 6] {
        self.state.lock().identity.mac
    }

    pub fn set_input(&self, slot: u16, value: f32, quality: Quality) {
        self.state.lock().inputs.insert(slot, (value, quality));
    }

    /// Last value the controller wrote to an output slot
    pub fn last_output(&self, slot: u16) -> Option<f32> {
        self.state.lock().outputs.get(&slot).copied()
    }

    pub fn outputs_received(&self) -> u64 {
        self.state.lock().outputs_received
    }

    pub fn connect_requests(&self) -> u32 {
        self.state.lock().connect_requests
    }

    pub fn releases(&self) -> u32 {
        self.state.lock().releases
    }

    pub fn has_ar(&self) -> bool {
        self.state.lock().ar.is_some()
    }

    pub fn application_ready_confirmed(&self) -> bool {
        self.state
            .lock()
            .ar
            .is_some_and(|ar| ar.application_ready)
    }

    /// Reject Connect requests whose AlarmCR block precedes the expected submodules
    pub fn require_vendor_format(&self, on: bool) {
        self.state.lock().require_vendor_format = on;
    }

    /// Reject every Connect with `status`
    pub fn reject_connects(&self, status: Option<PnioStatus>) {
        self.state.lock().reject_status = status;
    }

    /// Reject IOCRs with a reduction ratio below `ratio`
    pub fn reject_faster_than(&self, ratio: u16) {
        self.state.lock().min_reduction_ratio = ratio;
    }

    /// Swallow Connect requests without answering
    pub fn hold_connect(&self, on: bool) {
        self.state.lock().hold_connect = on;
    }

    /// Stop answering anything, as if powered off
    pub fn set_silent(&self, on: bool) {
        self.state.lock().silent = on;
    }

    /// Skip the next `count` input frames
    pub fn drop_input_frames(&self, count: u32) {
        self.state.lock().drop_inputs = count;
    }

    /// Repeat every input frame with the same cycle counter
    pub fn send_duplicates(&self, on: bool) {
        self.state.lock().send_duplicates = on;
    }

    /// Report a slot as pulled: ModuleDiff on Connect and IOPS bad in cyclic data
    pub fn set_missing(&self, slot: u16, missing: bool) {
        let mut s = self.state.lock();
        if missing {
            s.missing.insert(slot);
        } else {
            s.missing.remove(&slot);
        }
    }

    fn answer_identify(&self, dst: &[u8; 6], xid: u32, filter: Option<&str>) -> Option<Vec<u8>> {
        let s = self.state.lock();
        if s.silent {
            return None;
        }
        if let Some(name) = filter {
            if !s.identity.station_name.eq_ignore_ascii_case(name) {
                return None;
            }
        }
        Some(build_identify_response(dst, xid, &s.identity))
    }

    fn handle_rpc(&self, datagram: &[u8]) -> Vec<Vec<u8>> {
        let mut s = self.state.lock();
        if s.silent {
            return Vec::new();
        }
        let msg = match RpcMessage::decode(datagram) {
            Ok(m) => m,
            Err(e) => {
                trace!("rtu: undecodable rpc: {}", e);
                return Vec::new();
            },
        };
        if !msg.is_request() {
            s.record_confirmation(&msg);
            return Vec::new();
        }
        let blocks = match decode_blocks(&msg.payload) {
            Ok(b) => b,
            Err(_) => return vec![msg.response(STATUS_FORMAT_NOT_SUPPORTED, Vec::new()).encode()],
        };
        match msg.header.opnum {
            RPC_OPNUM_CONNECT => s.connect(&msg, &blocks),
            RPC_OPNUM_CONTROL => s.control(&msg, &blocks),
            RPC_OPNUM_RELEASE => s.release(&msg, &blocks),
            _ => vec![msg.response(STATUS_STATE_CONFLICT, Vec::new()).encode()],
        }
    }

    fn handle_output(&self, frame: &[u8]) -> Vec<Vec<u8>> {
        let Ok(output) = RtFrame::decode(frame) else {
            return Vec::new();
        };
        let mut s = self.state.lock();
        let Some(ar) = s.ar else {
            return Vec::new();
        };
        if output.frame_id != ar.output_frame_id {
            return Vec::new();
        }
        if let Ok(values) = decode_outputs(&s.layout, &output.data) {
            s.outputs.extend(values);
        }
        s.outputs_received += 1;

        if s.silent {
            return Vec::new();
        }
        if s.drop_inputs > 0 {
            s.drop_inputs -= 1;
            return Vec::new();
        }
        s.cycle_counter = s
            .cycle_counter
            .wrapping_add(SEND_CLOCK_FACTOR.wrapping_mul(ar.reduction_ratio));
        let input = RtFrame {
            dst: output.src,
            src: s.identity.mac,
            frame_id: ar.input_frame_id,
            data: encode_inputs(&s.layout, &s.inputs, &s.missing),
            cycle_counter: s.cycle_counter,
            data_status: DATA_STATUS_DEFAULT,
            transfer_status: 0,
        }
        .encode();
        if s.send_duplicates {
            vec![input.clone(), input]
        } else {
            vec![input]
        }
    }
}

impl RtuState {
    fn connect(&mut self, msg: &RpcMessage, blocks: &[Block]) -> Vec<Vec<u8>> {
        self.connect_requests += 1;
        if self.hold_connect {
            return Vec::new();
        }
        if let Some(status) = self.reject_status {
            return vec![msg.response(status, Vec::new()).encode()];
        }
        if self.require_vendor_format {
            let alarm = blocks.iter().position(|b| matches!(b, Block::AlarmCrReq(_)));
            let expected = blocks
                .iter()
                .position(|b| matches!(b, Block::ExpectedSubmodule(_)));
            if let (Some(a), Some(e)) = (alarm, expected) {
                if a < e {
                    return vec![msg.response(STATUS_FORMAT_NOT_SUPPORTED, Vec::new()).encode()];
                }
            }
        }

        let Some(ar_req) = blocks.iter().find_map(|b| match b {
            Block::ArReq(r) => Some(r),
            _ => None,
        }) else {
            return vec![msg.response(STATUS_FORMAT_NOT_SUPPORTED, Vec::new()).encode()];
        };

        let mut ar = DeviceAr {
            ar_uuid: ar_req.ar_uuid,
            session_key: ar_req.session_key,
            input_frame_id: FRAME_ID_INPUT_DEFAULT,
            output_frame_id: FRAME_ID_OUTPUT_DEFAULT,
            reduction_ratio: 1,
            parameterized: false,
            application_ready: false,
        };
        let mut answer = vec![Block::ArRes(ArBlockRes {
            ar_type: ar_req.ar_type,
            ar_uuid: ar_req.ar_uuid,
            session_key: ar_req.session_key,
            responder_mac: self.identity.mac,
            udp_rt_port: ETHERTYPE_PROFINET,
        })];
        for block in blocks {
            match block {
                Block::IocrReq(iocr) => {
                    if iocr.reduction_ratio < self.min_reduction_ratio {
                        return vec![msg.response(STATUS_TIMING_REJECTED, Vec::new()).encode()];
                    }
                    ar.reduction_ratio = iocr.reduction_ratio;
                    match iocr.iocr_type {
                        IocrType::Input => ar.input_frame_id = iocr.frame_id,
                        IocrType::Output => ar.output_frame_id = iocr.frame_id,
                    }
                    answer.push(Block::IocrRes(IocrBlockRes {
                        iocr_type: iocr.iocr_type,
                        reference: iocr.reference,
                        frame_id: iocr.frame_id,
                    }));
                },
                Block::AlarmCrReq(alarm) => answer.push(Block::AlarmCrRes(AlarmCrBlockRes {
                    alarm_type: alarm.alarm_type,
                    local_alarm_reference: alarm.local_alarm_reference,
                    max_alarm_data_length: alarm.max_alarm_data_length,
                })),
                _ => {},
            }
        }
        if let Some(diff) = self.module_diff() {
            answer.push(Block::ModuleDiff(diff));
        }

        // A new Connect replaces whatever AR was active
        self.ar = Some(ar);
        self.cycle_counter = 0;
        debug!(
            "rtu {}: AR {} accepted",
            self.identity.station_name, ar.ar_uuid
        );
        vec![msg.response(PnioStatus::OK, encode_blocks(&answer, 1)).encode()]
    }

    fn module_diff(&self) -> Option<ModuleDiffBlock> {
        let modules: Vec<ModuleDiff> = self
            .slots
            .iter()
            .filter(|s| self.missing.contains(&s.slot))
            .map(|s| ModuleDiff {
                slot: s.slot,
                ident: 0,
                state: 0,
                submodules: Vec::new(),
            })
            .collect();
        (!modules.is_empty()).then(|| ModuleDiffBlock {
            apis: vec![ModuleDiffApi {
                api: API_DEFAULT,
                modules,
            }],
        })
    }

    fn control(&mut self, msg: &RpcMessage, blocks: &[Block]) -> Vec<Vec<u8>> {
        let prm_end = blocks.iter().find_map(|b| match b {
            Block::Control(c) if c.command == CONTROL_CMD_PRM_END => Some(*c),
            _ => None,
        });
        let (Some(prm_end), Some(ar)) = (prm_end, self.ar.as_mut()) else {
            return vec![msg.response(STATUS_STATE_CONFLICT, Vec::new()).encode()];
        };
        if prm_end.ar_uuid != ar.ar_uuid {
            return vec![msg.response(STATUS_STATE_CONFLICT, Vec::new()).encode()];
        }
        ar.parameterized = true;

        let done = msg.response(
            PnioStatus::OK,
            encode_blocks(&[Block::Control(prm_end.done())], 1),
        );
        let ready = RpcMessage::request(
            RPC_OPNUM_CONTROL,
            object_uuid(self.instance, self.identity.device_id, self.identity.vendor_id),
            Uuid::from_bytes(PNIO_CONTROLLER_INTERFACE),
            Uuid::new_v4(),
            0,
            encode_blocks(
                &[Block::Control(ControlBlock::application_ready(
                    ar.ar_uuid,
                    ar.session_key,
                ))],
                1,
            ),
        );
        vec![done.encode(), ready.encode()]
    }

    fn release(&mut self, msg: &RpcMessage, blocks: &[Block]) -> Vec<Vec<u8>> {
        let release = blocks.iter().find_map(|b| match b {
            Block::Control(c) if c.command == CONTROL_CMD_RELEASE => Some(*c),
            _ => None,
        });
        let Some(release) = release else {
            return vec![msg.response(STATUS_STATE_CONFLICT, Vec::new()).encode()];
        };
        if self.ar.is_some_and(|ar| ar.ar_uuid == release.ar_uuid) {
            self.ar = None;
        }
        self.releases += 1;
        vec![msg
            .response(
                PnioStatus::OK,
                encode_blocks(&[Block::Control(release.done())], 1),
            )
            .encode()]
    }

    fn record_confirmation(&mut self, msg: &RpcMessage) {
        let Ok(blocks) = decode_blocks(&msg.payload) else {
            return;
        };
        let Some(ar) = self.ar.as_mut() else {
            return;
        };
        let confirmed = blocks.iter().any(|b| {
            matches!(b, Block::Control(c) if c.command == CONTROL_CMD_DONE && c.ar_uuid == ar.ar_uuid)
        });
        if confirmed && ar.parameterized {
            ar.application_ready = true;
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::protocols::profinet::dcp;

    fn rtu() -> SimulatedRtu {
        SimulatedRtu::new(
            "rtu-01",
            [0x00, 0x0E, 0xCF, 0, 0, 1],
            Ipv4Addr::new(192, 168, 1, 10),
            vec![SlotConfig::input(1, 0x10, 0x11)],
        )
    }

    fn endpoint(ip: Ipv4Addr) -> DeviceEndpoint {
        DeviceEndpoint {
            station_name: "rtu-01".to_string(),
            ip,
            mac: None,
        }
    }

    #[tokio::test]
    async fn test_discovery_sees_all_devices() {
        let network = MockNetwork::new();
        network.add_device(rtu());
        let silent = SimulatedRtu::new(
            "rtu-02",
            [0x00, 0x0E, 0xCF, 0, 0, 2],
            Ipv4Addr::new(192, 168, 1, 11),
            vec![SlotConfig::input(1, 0x10, 0x11)],
        );
        silent.set_silent(true);
        network.add_device(silent);

        let mut link = network.factory().open_link().await.unwrap();
        let found = dcp::discover(link.as_mut(), Duration::from_millis(20), None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].station_name, "rtu-01");
    }

    #[tokio::test]
    async fn test_live_counter_tracks_close_and_drop() {
        let network = MockNetwork::new();
        let factory = network.factory();
        let mut a = factory.open_link().await.unwrap();
        let b = factory
            .open_device(&endpoint(Ipv4Addr::new(10, 0, 0, 1)))
            .await
            .unwrap();
        assert_eq!(network.live_transports(), 2);

        a.close().await.unwrap();
        a.close().await.unwrap();
        assert_eq!(network.live_transports(), 1);
        assert_eq!(a.send_frame(&[0; 60]).await, Err(TransportError::Closed));

        drop(b);
        assert_eq!(network.live_transports(), 0);
        assert_eq!(network.opened_transports(), 2);
    }

    #[tokio::test]
    async fn test_rpc_needs_device_target() {
        let network = MockNetwork::new();
        let mut link = network.factory().open_link().await.unwrap();
        assert!(matches!(
            link.send_rpc(&[0; 100]).await,
            Err(TransportError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_open_failure_injection() {
        let network = MockNetwork::new();
        network.fail_opens(Some(TransportError::PermissionDenied("eth0".to_string())));
        let err = network.factory().open_link().await.unwrap_err();
        assert!(matches!(err, TransportError::PermissionDenied(_)));
        assert_eq!(network.live_transports(), 0);
    }

    #[test]
    fn test_from_config_derives_mac() {
        let cfg = DeviceConfig::new(
            "rtu-07",
            Ipv4Addr::new(192, 168, 1, 17),
            vec![SlotConfig::input(1, 0x10, 0x11)],
        );
        let rtu = SimulatedRtu::from_config(&cfg);
        assert_eq!(rtu.mac(), [0x00, 0x0E, 0xCF, 168, 1, 17]);
        assert_eq!(rtu.station_name(), "rtu-07");
    }
}
