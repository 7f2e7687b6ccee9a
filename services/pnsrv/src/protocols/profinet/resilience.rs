//! Connection strategies and rejection analysis
//!
//! Devices differ in what they accept during Connect: block order, block
//! padding and which optional blocks must be present. The establishment
//! engine walks an ordered list of [`Strategy`] descriptors; on every
//! failure the [`next_action`] decision function picks between retrying the
//! current strategy with adjusted parameters, advancing to the next
//! strategy, or giving up. The decision is a pure function of the
//! classification and the attempt state, so it is tested without any I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::blocks::{
    AlarmCrBlockReq, ArBlockReq, Block, ExpectedSubmoduleBlock, IocrBlockReq,
};
use super::codec::CodecError;
use super::rpc::PnioStatus;
use crate::core::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SpecCompliant,
    VendorCompatible,
    Minimal,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::SpecCompliant => "spec-compliant",
            StrategyKind::VendorCompatible => "vendor-compatible",
            StrategyKind::Minimal => "minimal",
        };
        f.write_str(s)
    }
}

/// How the Connect request is laid out for one strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub kind: StrategyKind,
    /// Output IOCR before input IOCR
    pub output_iocr_first: bool,
    /// ExpectedSubmoduleBlock before AlarmCRBlock
    pub expected_before_alarm: bool,
    pub include_alarm_cr: bool,
    /// Block alignment in bytes, padding counted in BlockLength
    pub block_alignment: usize,
    pub watchdog_factor: u16,
}

impl Strategy {
    pub const SPEC_COMPLIANT: Strategy = Strategy {
        kind: StrategyKind::SpecCompliant,
        output_iocr_first: false,
        expected_before_alarm: false,
        include_alarm_cr: true,
        block_alignment: 1,
        watchdog_factor: 3,
    };

    pub const VENDOR_COMPATIBLE: Strategy = Strategy {
        kind: StrategyKind::VendorCompatible,
        output_iocr_first: true,
        expected_before_alarm: true,
        include_alarm_cr: true,
        block_alignment: 4,
        watchdog_factor: 3,
    };

    pub const MINIMAL: Strategy = Strategy {
        kind: StrategyKind::Minimal,
        output_iocr_first: false,
        expected_before_alarm: true,
        include_alarm_cr: false,
        block_alignment: 1,
        watchdog_factor: 10,
    };

    /// Strategies in the order they are tried
    pub fn ordered() -> Vec<Strategy> {
        vec![
            Self::SPEC_COMPLIANT,
            Self::VENDOR_COMPATIBLE,
            Self::MINIMAL,
        ]
    }

    /// Arrange the Connect request blocks
    pub fn connect_blocks(
        &self,
        ar: ArBlockReq,
        input: IocrBlockReq,
        output: IocrBlockReq,
        alarm: AlarmCrBlockReq,
        expected: ExpectedSubmoduleBlock,
    ) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(5);
        blocks.push(Block::ArReq(ar));
        if self.output_iocr_first {
            blocks.push(Block::IocrReq(output));
            blocks.push(Block::IocrReq(input));
        } else {
            blocks.push(Block::IocrReq(input));
            blocks.push(Block::IocrReq(output));
        }
        let alarm = self.include_alarm_cr.then_some(Block::AlarmCrReq(alarm));
        let expected = Block::ExpectedSubmodule(expected);
        if self.expected_before_alarm {
            blocks.push(expected);
            blocks.extend(alarm);
        } else {
            blocks.extend(alarm);
            blocks.push(expected);
        }
        blocks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportTimeout,
    MalformedResponse,
    DeviceRejection,
    ProtocolViolation,
    CommunicationLoss,
    TransportFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TransportTimeout => "transport timeout",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::DeviceRejection => "device rejection",
            ErrorKind::ProtocolViolation => "protocol violation",
            ErrorKind::CommunicationLoss => "communication loss",
            ErrorKind::TransportFailure => "transport failure",
        };
        f.write_str(s)
    }
}

/// What a device rejection status points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    TimingParameter,
    ArConflict,
    FormatNotSupported,
    AlarmCr,
    ExpectedSubmodule,
    ResourceExhausted,
    StateConflict,
    Other,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionReason::TimingParameter => "timing parameter",
            RejectionReason::ArConflict => "AR conflict",
            RejectionReason::FormatNotSupported => "format not supported",
            RejectionReason::AlarmCr => "alarm CR",
            RejectionReason::ExpectedSubmodule => "expected submodule",
            RejectionReason::ResourceExhausted => "resource exhausted",
            RejectionReason::StateConflict => "state conflict",
            RejectionReason::Other => "unclassified",
        };
        f.write_str(s)
    }
}

/// Result of the error analyzer, attached to transitions into ERROR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub status: Option<PnioStatus>,
    pub reason: Option<RejectionReason>,
    pub recoverable: bool,
    pub remediation: Option<String>,
    pub detail: Option<String>,
}

impl ErrorClassification {
    fn new(kind: ErrorKind, recoverable: bool, remediation: &str) -> Self {
        Self {
            kind,
            status: None,
            reason: None,
            recoverable,
            remediation: Some(remediation.to_string()),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn timeout(step: &str) -> Self {
        Self::new(
            ErrorKind::TransportTimeout,
            true,
            "check device power and the network path",
        )
        .with_detail(format!("no response to {step}"))
    }

    pub fn malformed(err: &CodecError) -> Self {
        Self::new(
            ErrorKind::MalformedResponse,
            true,
            "device encoding not understood; check firmware version",
        )
        .with_detail(err.to_string())
    }

    pub fn protocol_violation(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ProtocolViolation,
            true,
            "device answered out of sequence; power-cycle the device",
        )
        .with_detail(detail)
    }

    pub fn communication_loss(missed: u32) -> Self {
        Self::new(
            ErrorKind::CommunicationLoss,
            true,
            "check cabling and device load, then reconnect",
        )
        .with_detail(format!("{missed} consecutive cycles missed"))
    }

    pub fn transport(err: &TransportError) -> Self {
        Self::new(
            ErrorKind::TransportFailure,
            false,
            "check the interface name and CAP_NET_RAW",
        )
        .with_detail(err.to_string())
    }

    pub fn discovery(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ProtocolViolation,
            false,
            "check slot configuration against the device's module layout",
        )
        .with_detail(detail)
    }

    /// Human-readable line for `last_error`, remediation included
    pub fn describe(&self) -> String {
        match &self.remediation {
            Some(r) => format!("{self}; {r}"),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(reason) = self.reason {
            write!(f, ": {reason}")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, " - {detail}")?;
        }
        Ok(())
    }
}

/// ErrorCode1 values of interest when ErrorDecode is PNIO
const CODE1_AR_BLOCK: u8 = 0x01;
const CODE1_IOCR_BLOCK: u8 = 0x02;
const CODE1_EXPECTED_SUBMODULE: u8 = 0x03;
const CODE1_ALARM_CR: u8 = 0x04;
const CODE1_IOD_CONTROL: u8 = 0x14;
const CODE1_CMRPC: u8 = 0x40;

/// Classify a device's PNIO status (its reason code)
pub fn classify_status(status: PnioStatus) -> ErrorClassification {
    use RejectionReason::*;

    let reason = match (status.code1, status.code2) {
        (CODE1_CMRPC, 0x00..=0x02) => FormatNotSupported,
        (CODE1_CMRPC, 0x03) => AlarmCr,
        (CODE1_CMRPC, 0x04 | 0x07 | 0x08) => ResourceExhausted,
        (CODE1_CMRPC, 0x05) => ArConflict,
        (CODE1_CMRPC, 0x06) => StateConflict,
        (CODE1_AR_BLOCK, 0x05) => ArConflict,
        (CODE1_AR_BLOCK, _) => FormatNotSupported,
        (CODE1_IOCR_BLOCK, 0x0A..=0x10) => TimingParameter,
        (CODE1_IOCR_BLOCK, _) => FormatNotSupported,
        (CODE1_EXPECTED_SUBMODULE, _) => ExpectedSubmodule,
        (CODE1_ALARM_CR, _) => AlarmCr,
        (CODE1_IOD_CONTROL, _) => StateConflict,
        _ => Other,
    };

    let (recoverable, remediation) = match reason {
        TimingParameter => (true, "increase cycle_time_ms for this device"),
        ArConflict => (
            true,
            "another controller may hold the device; release it or power-cycle the device",
        ),
        FormatNotSupported | AlarmCr => (
            true,
            "device firmware rejects the block layout; check firmware version",
        ),
        ResourceExhausted => (true, "reduce concurrent connections to the device"),
        StateConflict => (true, "wait for the device to finish its previous AR"),
        ExpectedSubmodule => (
            false,
            "check slot configuration against the device's module layout",
        ),
        Other => (false, "consult the device manual for this status code"),
    };

    ErrorClassification {
        kind: ErrorKind::DeviceRejection,
        status: Some(status),
        reason: Some(reason),
        recoverable,
        remediation: Some(remediation.to_string()),
        detail: None,
    }
}

/// Parameter change for a retry on the same strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    None,
    /// Double the reduction ratio
    SlowerCycle,
    /// Fresh AR UUID and session key
    NewArIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Retry(Adjustment),
    Advance,
    Fail,
}

/// Attempt bookkeeping for one `connect` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    pub strategy_index: usize,
    pub strategy_count: usize,
    pub retries_on_strategy: u32,
    pub timing_adjustments: u32,
    pub attempts: u32,
    pub max_attempts: u32,
}

const MAX_TIMING_ADJUSTMENTS: u32 = 2;

/// Decide what to do after a failed attempt
pub fn next_action(c: &ErrorClassification, s: &AttemptState) -> NextAction {
    if s.attempts >= s.max_attempts {
        return NextAction::Fail;
    }

    let advance_or_fail = if s.strategy_index + 1 < s.strategy_count {
        NextAction::Advance
    } else {
        NextAction::Fail
    };

    match c.kind {
        ErrorKind::TransportFailure | ErrorKind::CommunicationLoss => NextAction::Fail,
        ErrorKind::TransportTimeout if s.retries_on_strategy == 0 => {
            NextAction::Retry(Adjustment::None)
        },
        ErrorKind::TransportTimeout
        | ErrorKind::MalformedResponse
        | ErrorKind::ProtocolViolation => advance_or_fail,
        ErrorKind::DeviceRejection => match c.reason {
            Some(RejectionReason::TimingParameter)
                if s.timing_adjustments < MAX_TIMING_ADJUSTMENTS =>
            {
                NextAction::Retry(Adjustment::SlowerCycle)
            },
            Some(
                RejectionReason::ArConflict
                | RejectionReason::ResourceExhausted
                | RejectionReason::StateConflict,
            ) if s.retries_on_strategy == 0 => NextAction::Retry(Adjustment::NewArIdentity),
            _ if !c.recoverable => NextAction::Fail,
            _ => advance_or_fail,
        },
    }
}

/// Walks the strategy list for a single `connect` call
///
/// Created fresh for every call; nothing carries over to the next one.
#[derive(Debug, Clone)]
pub struct StrategySelector {
    strategies: Vec<Strategy>,
    state: AttemptState,
}

impl StrategySelector {
    pub fn new(strategies: Vec<Strategy>, max_attempts: u32) -> Self {
        let strategy_count = strategies.len();
        Self {
            strategies,
            state: AttemptState {
                strategy_index: 0,
                strategy_count,
                retries_on_strategy: 0,
                timing_adjustments: 0,
                attempts: 0,
                max_attempts,
            },
        }
    }

    pub fn current(&self) -> Option<&Strategy> {
        self.strategies.get(self.state.strategy_index)
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn begin_attempt(&mut self) {
        self.state.attempts += 1;
    }

    /// Apply the decision for `c` to the attempt state and return it
    pub fn decide(&mut self, c: &ErrorClassification) -> NextAction {
        let action = next_action(c, &self.state);
        match action {
            NextAction::Retry(adj) => {
                self.state.retries_on_strategy += 1;
                if adj == Adjustment::SlowerCycle {
                    self.state.timing_adjustments += 1;
                }
            },
            NextAction::Advance => {
                self.state.strategy_index += 1;
                self.state.retries_on_strategy = 0;
            },
            NextAction::Fail => {},
        }
        action
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn state(index: usize) -> AttemptState {
        AttemptState {
            strategy_index: index,
            strategy_count: 3,
            retries_on_strategy: 0,
            timing_adjustments: 0,
            attempts: 1,
            max_attempts: 8,
        }
    }

    fn rejection(code1: u8, code2: u8) -> ErrorClassification {
        classify_status(PnioStatus::new(0xDB, 0x81, code1, code2))
    }

    #[test]
    fn test_format_not_supported_advances() {
        let c = rejection(0x40, 0x01);
        assert_eq!(c.reason, Some(RejectionReason::FormatNotSupported));
        assert!(c.recoverable);
        assert_eq!(next_action(&c, &state(0)), NextAction::Advance);
        assert_eq!(next_action(&c, &state(2)), NextAction::Fail);
    }

    #[test]
    fn test_timing_retries_slower_then_advances() {
        let c = rejection(0x02, 0x0C);
        assert_eq!(c.reason, Some(RejectionReason::TimingParameter));
        let mut s = state(0);
        assert_eq!(next_action(&c, &s), NextAction::Retry(Adjustment::SlowerCycle));
        s.timing_adjustments = 2;
        assert_eq!(next_action(&c, &s), NextAction::Advance);
    }

    #[test]
    fn test_ar_conflict_retries_with_new_identity_once() {
        let c = rejection(0x40, 0x05);
        let mut s = state(1);
        assert_eq!(next_action(&c, &s), NextAction::Retry(Adjustment::NewArIdentity));
        s.retries_on_strategy = 1;
        assert_eq!(next_action(&c, &s), NextAction::Advance);
    }

    #[test]
    fn test_terminal_rejection_fails() {
        let c = rejection(0x03, 0x01);
        assert!(!c.recoverable);
        assert_eq!(next_action(&c, &state(0)), NextAction::Fail);
        assert_eq!(next_action(&rejection(0x77, 0x00), &state(0)), NextAction::Fail);
    }

    #[test]
    fn test_timeout_retries_once() {
        let c = ErrorClassification::timeout("connect");
        let mut s = state(0);
        assert_eq!(next_action(&c, &s), NextAction::Retry(Adjustment::None));
        s.retries_on_strategy = 1;
        assert_eq!(next_action(&c, &s), NextAction::Advance);
    }

    #[test]
    fn test_transport_failure_is_fatal() {
        let c = ErrorClassification::transport(&TransportError::PermissionDenied(
            "eth0".to_string(),
        ));
        assert_eq!(next_action(&c, &state(0)), NextAction::Fail);
    }

    #[test]
    fn test_attempt_bound() {
        let c = rejection(0x40, 0x01);
        let mut s = state(0);
        s.attempts = s.max_attempts;
        assert_eq!(next_action(&c, &s), NextAction::Fail);
    }

    #[test]
    fn test_selector_walks_strategies() {
        let mut sel = StrategySelector::new(Strategy::ordered(), 8);
        let c = rejection(0x40, 0x01);
        sel.begin_attempt();
        assert_eq!(sel.current().unwrap().kind, StrategyKind::SpecCompliant);
        assert_eq!(sel.decide(&c), NextAction::Advance);
        assert_eq!(sel.current().unwrap().kind, StrategyKind::VendorCompatible);
        sel.begin_attempt();
        assert_eq!(sel.decide(&c), NextAction::Advance);
        sel.begin_attempt();
        assert_eq!(sel.decide(&c), NextAction::Fail);
        assert_eq!(sel.state().attempts, 3);
    }

    #[test]
    fn test_display() {
        let c = rejection(0x40, 0x01);
        assert_eq!(
            c.to_string(),
            "device rejection: format not supported (status DB814001)"
        );
        let loss = ErrorClassification::communication_loss(3);
        assert!(loss.to_string().starts_with("communication loss"));
        assert!(loss.describe().contains("reconnect"));
    }

    #[test]
    fn test_block_order() {
        use crate::protocols::profinet::blocks::*;

        let ar = ArBlockReq {
            ar_type: 1,
            ar_uuid: uuid::Uuid::nil(),
            session_key: 1,
            initiator_mac: [0; 6],
            initiator_object: uuid::Uuid::nil(),
            ar_properties: 0,
            timeout_factor: 100,
            udp_rt_port: 0x8892,
            station_name: "controller".into(),
        };
        let iocr = |t| IocrBlockReq {
            iocr_type: t,
            reference: 1,
            lt: 0x8892,
            properties: 1,
            data_length: 40,
            frame_id: 0x8000,
            send_clock_factor: 32,
            reduction_ratio: 32,
            phase: 1,
            sequence: 0,
            frame_send_offset: 0xFFFF_FFFF,
            watchdog_factor: 3,
            data_hold_factor: 3,
            tag_header: 0xC000,
            multicast_mac: [0; 6],
            apis: vec![],
        };
        let alarm = AlarmCrBlockReq {
            alarm_type: 1,
            lt: 0x8892,
            properties: 0,
            rta_timeout_factor: 1,
            rta_retries: 3,
            local_alarm_reference: 1,
            max_alarm_data_length: 200,
            tag_header_high: 0xC000,
            tag_header_low: 0xA000,
        };
        let expected = ExpectedSubmoduleBlock { apis: vec![] };

        let types = |s: Strategy| {
            s.connect_blocks(
                ar.clone(),
                iocr(IocrType::Input),
                iocr(IocrType::Output),
                alarm.clone(),
                expected.clone(),
            )
            .iter()
            .map(|b| b.block_type())
            .collect::<Vec<_>>()
        };

        assert_eq!(
            types(Strategy::SPEC_COMPLIANT),
            vec![0x0101, 0x0102, 0x0102, 0x0103, 0x0104]
        );
        assert_eq!(
            types(Strategy::VENDOR_COMPATIBLE),
            vec![0x0101, 0x0102, 0x0102, 0x0104, 0x0103]
        );
        assert_eq!(types(Strategy::MINIMAL), vec![0x0101, 0x0102, 0x0102, 0x0104]);
    }
}
