//! Connection establishment engine
//!
//! Drives one `connect` call through its internal steps:
//!
//! ```text
//! Idle -> IdentityExchanged -> RelationshipsRequested -> ParameterEndSent
//!      -> ApplicationReady -> Established        (or Failed at any step)
//! ```
//!
//! Each step sends one request and waits for one answer bounded by the step
//! timeout. Failures are classified and handed to the strategy selector,
//! which decides between retry, next strategy and giving up.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::blocks::{
    decode_blocks, encode_blocks, AlarmCrBlockReq, ArBlockReq, Block, ControlBlock, IocrBlockReq,
    IocrType, ModuleDiffBlock,
};
use super::constants::*;
use super::dcp;
use super::resilience::{
    classify_status, Adjustment, ErrorClassification, NextAction, Strategy, StrategyKind,
    StrategySelector,
};
use super::rpc::{object_uuid, PacketType, RpcMessage};
use super::rt::{expected_submodules, IoLayout};
use crate::core::config::{ControllerConfig, DeviceConfig, SlotConfig};
use crate::core::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishStep {
    Idle,
    IdentityExchanged,
    RelationshipsRequested,
    ParameterEndSent,
    ApplicationReady,
    Established,
    Failed,
}

impl fmt::Display for EstablishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EstablishStep::Idle => "idle",
            EstablishStep::IdentityExchanged => "identity exchanged",
            EstablishStep::RelationshipsRequested => "relationships requested",
            EstablishStep::ParameterEndSent => "parameter end sent",
            EstablishStep::ApplicationReady => "application ready",
            EstablishStep::Established => "established",
            EstablishStep::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What to connect to
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub station_name: String,
    pub ip: Ipv4Addr,
    /// Checked against the DCP answer when set
    pub mac: Option<[u8; 6]>,
    pub vendor_id: u16,
    pub device_id: u16,
    pub instance: u16,
    pub cycle_time: Duration,
    pub slots: Vec<SlotConfig>,
}

impl ConnectionTarget {
    pub fn from_config(device: &DeviceConfig, controller: &ControllerConfig) -> Self {
        Self {
            station_name: device.station_name.clone(),
            ip: device.ip,
            mac: device
                .mac
                .as_deref()
                .and_then(crate::core::config::parse_mac),
            vendor_id: device.vendor_id,
            device_id: device.device_id,
            instance: device.instance,
            cycle_time: Duration::from_millis(
                device.cycle_time_ms.unwrap_or(controller.cycle_time_ms),
            ),
            slots: device.slots.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub step_timeout: Duration,
    pub max_attempts: u32,
    pub strategies: Vec<Strategy>,
    /// Station name we announce in the AR block
    pub controller_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_millis(3000),
            max_attempts: 8,
            strategies: Strategy::ordered(),
            controller_name: "pnsrv-controller".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_controller(controller: &ControllerConfig) -> Self {
        Self {
            step_timeout: Duration::from_millis(controller.step_timeout_ms),
            max_attempts: controller.max_attempts,
            ..Self::default()
        }
    }
}

/// Negotiated parameters of an established relationship
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub ar_uuid: Uuid,
    pub session_key: u16,
    pub object_uuid: Uuid,
    pub input_frame_id: u16,
    pub output_frame_id: u16,
    pub reduction_ratio: u16,
    pub watchdog_factor: u16,
    pub strategy: StrategyKind,
    pub device_mac: [u8; 6],
    pub layout: IoLayout,
    pub module_diff: Option<ModuleDiffBlock>,
    pub attempts: u32,
}

impl SessionParams {
    /// Cycle time actually negotiated (reduction ratio x 1 ms send clock)
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(u64::from(self.reduction_ratio))
    }

    /// Increment of the APDU cycle counter per cycle, in 31.25 us units
    pub fn counter_step(&self) -> u16 {
        SEND_CLOCK_FACTOR.wrapping_mul(self.reduction_ratio)
    }
}

#[derive(Debug)]
pub struct Established {
    pub transport: Box<dyn Transport>,
    pub params: SessionParams,
}

#[derive(Debug, Clone)]
pub struct EstablishFailure {
    pub classification: ErrorClassification,
    pub step: EstablishStep,
    pub strategy: Option<StrategyKind>,
    pub attempts: u32,
}

impl fmt::Display for EstablishFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.classification, self.step)?;
        if let Some(s) = self.strategy {
            write!(f, " ({s}, {} attempts)", self.attempts)?;
        }
        Ok(())
    }
}

/// Reduction ratio for a cycle time with a 1 ms send clock: next power of two, 1..=512
pub fn reduction_ratio_for(cycle: Duration) -> u16 {
    let ms = cycle.as_millis().clamp(1, u128::from(MAX_REDUCTION_RATIO)) as u16;
    ms.next_power_of_two().min(MAX_REDUCTION_RATIO)
}

/// Parameters that vary between attempts
#[derive(Debug, Clone, Copy)]
struct Attempt {
    strategy: Strategy,
    ar_uuid: Uuid,
    session_key: u16,
    reduction_ratio: u16,
}

#[derive(Debug)]
struct AttemptError {
    classification: ErrorClassification,
    step: EstablishStep,
    /// The device accepted the AR, so it must be released
    ar_accepted: bool,
}

impl AttemptError {
    fn new(classification: ErrorClassification, step: EstablishStep, ar_accepted: bool) -> Self {
        Self {
            classification,
            step,
            ar_accepted,
        }
    }
}

/// Establish an application relationship with `target`
///
/// On success the transport is handed back inside [`Established`]; on
/// failure it has been closed.
pub async fn establish(
    mut transport: Box<dyn Transport>,
    target: &ConnectionTarget,
    cfg: &EngineConfig,
) -> Result<Established, EstablishFailure> {
    let station = target.station_name.as_str();

    let device_mac = match identify(transport.as_mut(), target, cfg.step_timeout).await {
        Ok(mac) => mac,
        Err(classification) => {
            let _ = transport.close().await;
            return Err(EstablishFailure {
                classification,
                step: EstablishStep::Idle,
                strategy: None,
                attempts: 0,
            });
        },
    };
    debug!("{}: identity exchanged, mac {}", station, common::hex::mac(&device_mac));

    let object = object_uuid(target.instance, target.device_id, target.vendor_id);
    let mut selector = StrategySelector::new(cfg.strategies.clone(), cfg.max_attempts);
    let mut attempt = Attempt {
        strategy: Strategy::SPEC_COMPLIANT,
        ar_uuid: Uuid::new_v4(),
        session_key: 1,
        reduction_ratio: reduction_ratio_for(target.cycle_time),
    };

    loop {
        let Some(strategy) = selector.current().copied() else {
            let _ = transport.close().await;
            return Err(EstablishFailure {
                classification: ErrorClassification::protocol_violation("no strategy left"),
                step: EstablishStep::Failed,
                strategy: None,
                attempts: selector.state().attempts,
            });
        };
        attempt.strategy = strategy;
        selector.begin_attempt();
        debug!(
            "{}: attempt {} with {} strategy",
            station,
            selector.state().attempts,
            strategy.kind
        );

        let err = match run_attempt(transport.as_mut(), target, cfg, &attempt, object, device_mac)
            .await
        {
            Ok(mut params) => {
                params.attempts = selector.state().attempts;
                info!(
                    "{}: AR established ({} strategy, {} ms cycle)",
                    station,
                    strategy.kind,
                    params.cycle_time().as_millis()
                );
                return Ok(Established { transport, params });
            },
            Err(err) => err,
        };

        warn!(
            "{}: {} strategy failed at {}: {}",
            station, strategy.kind, err.step, err.classification
        );
        if err.ar_accepted {
            release(
                transport.as_mut(),
                attempt.ar_uuid,
                attempt.session_key,
                object,
                cfg.step_timeout,
            )
            .await;
        }

        match selector.decide(&err.classification) {
            NextAction::Retry(adjustment) => {
                attempt.session_key = attempt.session_key.wrapping_add(1);
                match adjustment {
                    Adjustment::SlowerCycle => {
                        attempt.reduction_ratio =
                            (attempt.reduction_ratio * 2).min(MAX_REDUCTION_RATIO);
                    },
                    Adjustment::NewArIdentity => attempt.ar_uuid = Uuid::new_v4(),
                    Adjustment::None => {},
                }
                debug!("{}: retry with {:?}", station, adjustment);
            },
            NextAction::Advance => {
                attempt.session_key = attempt.session_key.wrapping_add(1);
            },
            NextAction::Fail => {
                let _ = transport.close().await;
                return Err(EstablishFailure {
                    classification: err.classification,
                    step: err.step,
                    strategy: Some(strategy.kind),
                    attempts: selector.state().attempts,
                });
            },
        }
    }
}

async fn identify(
    transport: &mut dyn Transport,
    target: &ConnectionTarget,
    timeout: Duration,
) -> Result<[u8; 6], ErrorClassification> {
    let device = dcp::identify_station(transport, &target.station_name, timeout)
        .await
        .map_err(|e| ErrorClassification::transport(&e))?
        .ok_or_else(|| ErrorClassification::timeout("DCP identify"))?;

    if let Some(expected) = target.mac {
        if expected != device.mac {
            return Err(ErrorClassification::protocol_violation(format!(
                "station answered from {}, expected {}",
                common::hex::mac(&device.mac),
                common::hex::mac(&expected)
            )));
        }
    }
    if let Some(ip) = &device.ip {
        if ip.ip != target.ip {
            warn!(
                "{}: device reports IP {}, configured {}",
                target.station_name, ip.ip, target.ip
            );
        }
    }
    Ok(device.mac)
}

fn transport_failure(e: &TransportError, step: EstablishStep, accepted: bool) -> AttemptError {
    AttemptError::new(ErrorClassification::transport(e), step, accepted)
}

/// Send a request and wait for its response; rejections become classifications
async fn call(
    transport: &mut dyn Transport,
    request: &RpcMessage,
    timeout: Duration,
    step: EstablishStep,
    accepted: bool,
) -> Result<RpcMessage, AttemptError> {
    transport
        .send_rpc(&request.encode())
        .await
        .map_err(|e| transport_failure(&e, step, accepted))?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let datagram = match transport.recv_rpc(remaining).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                return Err(AttemptError::new(
                    ErrorClassification::timeout(&step.to_string()),
                    step,
                    accepted,
                ))
            },
            Err(e) => return Err(transport_failure(&e, step, accepted)),
        };
        let msg = match RpcMessage::decode(&datagram) {
            Ok(msg) => msg,
            Err(e) => {
                return Err(AttemptError::new(
                    ErrorClassification::malformed(&e),
                    step,
                    accepted,
                ))
            },
        };
        if !msg.answers(&request.header.activity, request.header.sequence) {
            debug!("rpc: ignoring unrelated {:?}", msg.header.packet_type);
            continue;
        }
        return match msg.header.packet_type {
            PacketType::Response if msg.status.is_ok() => Ok(msg),
            _ => Err(AttemptError::new(classify_status(msg.status), step, accepted)),
        };
    }
}

fn iocr_request(
    iocr_type: IocrType,
    layout: &IoLayout,
    attempt: &Attempt,
) -> IocrBlockReq {
    let (reference, frame_id) = match iocr_type {
        IocrType::Input => (1, FRAME_ID_INPUT_DEFAULT),
        IocrType::Output => (2, FRAME_ID_OUTPUT_DEFAULT),
    };
    IocrBlockReq {
        iocr_type,
        reference,
        lt: ETHERTYPE_PROFINET,
        properties: IOCR_PROPERTIES_RT_CLASS_1,
        data_length: layout.data_length(iocr_type),
        frame_id,
        send_clock_factor: SEND_CLOCK_FACTOR,
        reduction_ratio: attempt.reduction_ratio,
        phase: 1,
        sequence: 0,
        frame_send_offset: 0xFFFF_FFFF,
        watchdog_factor: attempt.strategy.watchdog_factor,
        data_hold_factor: attempt.strategy.watchdog_factor,
        tag_header: IOCR_TAG_HEADER,
        multicast_mac: [0; 6],
        apis: vec![layout.iocr_api(iocr_type)],
    }
}

fn connect_blocks(
    transport: &dyn Transport,
    target: &ConnectionTarget,
    cfg: &EngineConfig,
    attempt: &Attempt,
    layout: &IoLayout,
) -> Vec<Block> {
    let ar = ArBlockReq {
        ar_type: AR_TYPE_IOC_SINGLE,
        ar_uuid: attempt.ar_uuid,
        session_key: attempt.session_key,
        initiator_mac: transport.local_mac(),
        initiator_object: object_uuid(1, 0, 0),
        ar_properties: AR_PROPERTIES_DEFAULT,
        timeout_factor: AR_ACTIVITY_TIMEOUT_FACTOR,
        udp_rt_port: ETHERTYPE_PROFINET,
        station_name: cfg.controller_name.clone(),
    };
    let alarm = AlarmCrBlockReq {
        alarm_type: ALARM_CR_TYPE,
        lt: ETHERTYPE_PROFINET,
        properties: 0,
        rta_timeout_factor: ALARM_CR_RTA_TIMEOUT_FACTOR,
        rta_retries: ALARM_CR_RTA_RETRIES,
        local_alarm_reference: 1,
        max_alarm_data_length: ALARM_CR_MAX_DATA_LENGTH,
        tag_header_high: ALARM_CR_TAG_HIGH,
        tag_header_low: ALARM_CR_TAG_LOW,
    };
    attempt.strategy.connect_blocks(
        ar,
        iocr_request(IocrType::Input, layout, attempt),
        iocr_request(IocrType::Output, layout, attempt),
        alarm,
        expected_submodules(&target.slots),
    )
}

async fn run_attempt(
    transport: &mut dyn Transport,
    target: &ConnectionTarget,
    cfg: &EngineConfig,
    attempt: &Attempt,
    object: Uuid,
    device_mac: [u8; 6],
) -> Result<SessionParams, AttemptError> {
    let layout = IoLayout::new(&target.slots);
    let activity = Uuid::new_v4();

    // Connect
    let step = EstablishStep::RelationshipsRequested;
    let blocks = connect_blocks(transport, target, cfg, attempt, &layout);
    let request = RpcMessage::request(
        RPC_OPNUM_CONNECT,
        object,
        Uuid::from_bytes(PNIO_DEVICE_INTERFACE),
        activity,
        0,
        encode_blocks(&blocks, attempt.strategy.block_alignment),
    );
    let response = call(transport, &request, cfg.step_timeout, step, false).await?;
    let blocks = decode_blocks(&response.payload)
        .map_err(|e| AttemptError::new(ErrorClassification::malformed(&e), step, false))?;

    let mut ar_res = None;
    let mut input_frame_id = FRAME_ID_INPUT_DEFAULT;
    let mut output_frame_id = FRAME_ID_OUTPUT_DEFAULT;
    let mut module_diff = None;
    for block in blocks {
        match block {
            Block::ArRes(res) => ar_res = Some(res),
            Block::IocrRes(res) => match res.iocr_type {
                IocrType::Input => input_frame_id = res.frame_id,
                IocrType::Output => output_frame_id = res.frame_id,
            },
            Block::ModuleDiff(diff) => module_diff = Some(diff),
            Block::Unknown { block_type, .. } => {
                debug!("{}: ignoring block {:#06x}", target.station_name, block_type)
            },
            _ => {},
        }
    }
    match ar_res {
        Some(res) if res.ar_uuid == attempt.ar_uuid => {},
        Some(res) => {
            return Err(AttemptError::new(
                ErrorClassification::protocol_violation(format!(
                    "connect answered for AR {}",
                    res.ar_uuid
                )),
                step,
                true,
            ))
        },
        None => {
            return Err(AttemptError::new(
                ErrorClassification::protocol_violation("connect response without ARBlockRes"),
                step,
                false,
            ))
        },
    }

    // Parameter end
    let step = EstablishStep::ParameterEndSent;
    let prm_end = ControlBlock::prm_end(attempt.ar_uuid, attempt.session_key);
    let request = RpcMessage::request(
        RPC_OPNUM_CONTROL,
        object,
        Uuid::from_bytes(PNIO_DEVICE_INTERFACE),
        activity,
        1,
        encode_blocks(&[Block::Control(prm_end)], attempt.strategy.block_alignment),
    );
    let response = call(transport, &request, cfg.step_timeout, step, true).await?;
    let done = decode_blocks(&response.payload)
        .map_err(|e| AttemptError::new(ErrorClassification::malformed(&e), step, true))?
        .into_iter()
        .any(|b| matches!(b, Block::Control(c) if c.command == CONTROL_CMD_DONE
            && c.block_type == BLOCK_IOD_CONTROL_RES));
    if !done {
        return Err(AttemptError::new(
            ErrorClassification::protocol_violation("parameter end not confirmed"),
            step,
            true,
        ));
    }

    // Application ready, sent by the device
    let step = EstablishStep::ApplicationReady;
    await_application_ready(transport, attempt, cfg.step_timeout)
        .await
        .map_err(|c| AttemptError::new(c, step, true))?;

    Ok(SessionParams {
        ar_uuid: attempt.ar_uuid,
        session_key: attempt.session_key,
        object_uuid: object,
        input_frame_id,
        output_frame_id,
        reduction_ratio: attempt.reduction_ratio,
        watchdog_factor: attempt.strategy.watchdog_factor,
        strategy: attempt.strategy.kind,
        device_mac,
        layout,
        module_diff,
        attempts: 0,
    })
}

async fn await_application_ready(
    transport: &mut dyn Transport,
    attempt: &Attempt,
    timeout: Duration,
) -> Result<(), ErrorClassification> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let datagram = transport
            .recv_rpc(remaining)
            .await
            .map_err(|e| ErrorClassification::transport(&e))?
            .ok_or_else(|| ErrorClassification::timeout("application ready"))?;
        let msg = RpcMessage::decode(&datagram).map_err(|e| ErrorClassification::malformed(&e))?;
        if !msg.is_request() || msg.header.opnum != RPC_OPNUM_CONTROL {
            continue;
        }
        let blocks = decode_blocks(&msg.payload).map_err(|e| ErrorClassification::malformed(&e))?;
        let ready = blocks.iter().find_map(|b| match b {
            Block::Control(c)
                if c.command == CONTROL_CMD_APPLICATION_READY && c.ar_uuid == attempt.ar_uuid =>
            {
                Some(*c)
            },
            _ => None,
        });
        let Some(ready) = ready else {
            continue;
        };
        let reply = msg.response(
            super::rpc::PnioStatus::OK,
            encode_blocks(&[Block::Control(ready.done())], attempt.strategy.block_alignment),
        );
        transport
            .send_rpc(&reply.encode())
            .await
            .map_err(|e| ErrorClassification::transport(&e))?;
        return Ok(());
    }
}

/// Best-effort Release of an AR; failures are only logged
pub async fn release(
    transport: &mut dyn Transport,
    ar_uuid: Uuid,
    session_key: u16,
    object: Uuid,
    timeout: Duration,
) {
    let request = RpcMessage::request(
        RPC_OPNUM_RELEASE,
        object,
        Uuid::from_bytes(PNIO_DEVICE_INTERFACE),
        Uuid::new_v4(),
        0,
        encode_blocks(&[Block::Control(ControlBlock::release(ar_uuid, session_key))], 1),
    );
    match call(transport, &request, timeout, EstablishStep::Idle, true).await {
        Ok(_) => debug!("release of AR {} confirmed", ar_uuid),
        Err(e) => debug!("release of AR {}: {}", ar_uuid, e.classification),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::transport::mock::{MockNetwork, SimulatedRtu};
    use crate::core::transport::{DeviceEndpoint, TransportFactory};
    use crate::protocols::profinet::rpc::PnioStatus;

    fn target() -> ConnectionTarget {
        ConnectionTarget {
            station_name: "rtu-01".to_string(),
            ip: Ipv4Addr::new(192, 168, 1, 10),
            mac: None,
            vendor_id: 0x0493,
            device_id: 0x0001,
            instance: 1,
            cycle_time: Duration::from_millis(20),
            slots: vec![
                SlotConfig::input(1, 0x10, 0x11),
                SlotConfig::output(2, 0x20, 0x21),
            ],
        }
    }

    fn cfg() -> EngineConfig {
        EngineConfig {
            step_timeout: Duration::from_millis(200),
            ..EngineConfig::default()
        }
    }

    async fn open(network: &MockNetwork, t: &ConnectionTarget) -> Box<dyn Transport> {
        network
            .factory()
            .open_device(&DeviceEndpoint {
                station_name: t.station_name.clone(),
                ip: t.ip,
                mac: None,
            })
            .await
            .unwrap()
    }

    fn network() -> (MockNetwork, SimulatedRtu) {
        let network = MockNetwork::new();
        let t = target();
        let rtu = SimulatedRtu::new(&t.station_name, [0x00, 0x0E, 0xCF, 0, 0, 1], t.ip, t.slots.clone());
        network.add_device(rtu.clone());
        (network, rtu)
    }

    #[test]
    fn test_reduction_ratio() {
        assert_eq!(reduction_ratio_for(Duration::from_millis(1)), 1);
        assert_eq!(reduction_ratio_for(Duration::from_millis(20)), 32);
        assert_eq!(reduction_ratio_for(Duration::from_millis(32)), 32);
        assert_eq!(reduction_ratio_for(Duration::from_millis(0)), 1);
        assert_eq!(reduction_ratio_for(Duration::from_secs(5)), 512);
    }

    #[tokio::test]
    async fn test_establish_spec_compliant() {
        let (network, rtu) = network();
        let t = target();
        let est = establish(open(&network, &t).await, &t, &cfg()).await.unwrap();
        assert_eq!(est.params.strategy, StrategyKind::SpecCompliant);
        assert_eq!(est.params.attempts, 1);
        assert_eq!(est.params.reduction_ratio, 32);
        assert_eq!(est.params.device_mac, [0x00, 0x0E, 0xCF, 0, 0, 1]);
        assert!(rtu.has_ar());
    }

    #[tokio::test]
    async fn test_format_rejection_falls_back_to_vendor_layout() {
        let (network, rtu) = network();
        rtu.require_vendor_format(true);
        let t = target();
        let est = establish(open(&network, &t).await, &t, &cfg()).await.unwrap();
        assert_eq!(est.params.strategy, StrategyKind::VendorCompatible);
        assert_eq!(est.params.attempts, 2);
        assert_eq!(rtu.connect_requests(), 2);
    }

    #[tokio::test]
    async fn test_terminal_rejection_fails_and_closes() {
        let (network, rtu) = network();
        rtu.reject_connects(Some(PnioStatus::new(0xDB, 0x81, 0x03, 0x01)));
        let t = target();
        let failure = establish(open(&network, &t).await, &t, &cfg())
            .await
            .unwrap_err();
        assert_eq!(failure.step, EstablishStep::RelationshipsRequested);
        assert!(!failure.classification.recoverable);
        assert_eq!(failure.attempts, 1);
        assert_eq!(network.live_transports(), 0);
    }

    #[tokio::test]
    async fn test_unknown_station_times_out_at_identify() {
        let (network, _rtu) = network();
        let mut t = target();
        t.station_name = "rtu-99".to_string();
        let failure = establish(open(&network, &t).await, &t, &cfg())
            .await
            .unwrap_err();
        assert_eq!(failure.step, EstablishStep::Idle);
        assert_eq!(
            failure.classification.kind,
            crate::protocols::profinet::resilience::ErrorKind::TransportTimeout
        );
    }

    #[tokio::test]
    async fn test_timing_rejection_slows_cycle() {
        let (network, rtu) = network();
        rtu.reject_faster_than(64);
        let t = target();
        let est = establish(open(&network, &t).await, &t, &cfg()).await.unwrap();
        assert_eq!(est.params.reduction_ratio, 64);
        assert_eq!(est.params.strategy, StrategyKind::SpecCompliant);
    }
}
