//! Device connection state machine
//!
//! ```text
//! OFFLINE|ERROR      --connect-------------> CONNECTING
//! CONNECTING         --ar_established------> DISCOVERY
//! DISCOVERY          --discovery_complete--> RUNNING
//! RUNNING|ERROR      --disconnect----------> OFFLINE
//! CONNECTING         --connection_failed---> ERROR
//! DISCOVERY          --discovery_failed----> ERROR
//! RUNNING            --comm_failure--------> ERROR
//! CONNECTING|DISCOVERY --abort-------------> OFFLINE
//! ```
//!
//! Anything not in [`TRANSITIONS`] is rejected and leaves the state unchanged.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PnioError, Result};
use crate::protocols::profinet::resilience::ErrorClassification;

/// Transition records kept per device
pub const HISTORY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Offline,
    Connecting,
    Discovery,
    Running,
    Error,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 5] = [
        ConnectionState::Offline,
        ConnectionState::Connecting,
        ConnectionState::Discovery,
        ConnectionState::Running,
        ConnectionState::Error,
    ];

    /// OFFLINE or ERROR: no session, removable
    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionState::Offline | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Offline => write!(f, "OFFLINE"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Discovery => write!(f, "DISCOVERY"),
            ConnectionState::Running => write!(f, "RUNNING"),
            ConnectionState::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Connect,
    ArEstablished,
    DiscoveryComplete,
    Disconnect,
    ConnectionFailed,
    DiscoveryFailed,
    CommFailure,
    Abort,
}

impl Trigger {
    pub const ALL: [Trigger; 8] = [
        Trigger::Connect,
        Trigger::ArEstablished,
        Trigger::DiscoveryComplete,
        Trigger::Disconnect,
        Trigger::ConnectionFailed,
        Trigger::DiscoveryFailed,
        Trigger::CommFailure,
        Trigger::Abort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Connect => "connect",
            Trigger::ArEstablished => "ar_established",
            Trigger::DiscoveryComplete => "discovery_complete",
            Trigger::Disconnect => "disconnect",
            Trigger::ConnectionFailed => "connection_failed",
            Trigger::DiscoveryFailed => "discovery_failed",
            Trigger::CommFailure => "comm_failure",
            Trigger::Abort => "abort",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use ConnectionState as S;

/// `(from, trigger, to)`
pub const TRANSITIONS: &[(ConnectionState, Trigger, ConnectionState)] = &[
    (S::Offline, Trigger::Connect, S::Connecting),
    (S::Error, Trigger::Connect, S::Connecting),
    (S::Connecting, Trigger::ArEstablished, S::Discovery),
    (S::Discovery, Trigger::DiscoveryComplete, S::Running),
    (S::Running, Trigger::Disconnect, S::Offline),
    (S::Error, Trigger::Disconnect, S::Offline),
    (S::Connecting, Trigger::ConnectionFailed, S::Error),
    (S::Discovery, Trigger::DiscoveryFailed, S::Error),
    (S::Running, Trigger::CommFailure, S::Error),
    (S::Connecting, Trigger::Abort, S::Offline),
    (S::Discovery, Trigger::Abort, S::Offline),
];

/// Target state of `trigger` fired in `from`, if the table allows it
pub fn target(from: ConnectionState, trigger: Trigger) -> Option<ConnectionState> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == trigger)
        .map(|(_, _, to)| *to)
}

/// One applied transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub station: String,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub trigger: Trigger,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    /// Set on transitions into ERROR
    pub classification: Option<ErrorClassification>,
}

/// Observer invoked around every accepted transition
pub trait TransitionHook: Send + Sync + fmt::Debug {
    fn before(&self, _station: &str, _from: ConnectionState, _trigger: Trigger) {}

    fn after(&self, _record: &TransitionRecord) {}
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    station: String,
    state: ConnectionState,
    last_change: DateTime<Utc>,
    history: VecDeque<TransitionRecord>,
    hooks: Vec<Arc<dyn TransitionHook>>,
}

impl StateMachine {
    pub fn new(station: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            state: ConnectionState::Offline,
            last_change: Utc::now(),
            history: VecDeque::with_capacity(HISTORY_LEN),
            hooks: Vec::new(),
        }
    }

    pub fn add_hook(&mut self, hook: Arc<dyn TransitionHook>) {
        self.hooks.push(hook);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_change(&self) -> DateTime<Utc> {
        self.last_change
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.history.back()
    }

    /// Oldest first
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.history.iter().cloned().collect()
    }

    /// Whether `trigger` is allowed from the current state
    pub fn can_fire(&self, trigger: Trigger) -> bool {
        target(self.state, trigger).is_some()
    }

    /// Apply `trigger`; a classification is kept only on transitions into ERROR
    pub fn fire(
        &mut self,
        trigger: Trigger,
        reason: impl Into<String>,
        classification: Option<ErrorClassification>,
    ) -> Result<TransitionRecord> {
        let from = self.state;
        let Some(to) = target(from, trigger) else {
            warn!("{}: rejected {} in {}", self.station, trigger, from);
            return Err(PnioError::InvalidTransition {
                from,
                trigger: trigger.to_string(),
            });
        };

        for hook in &self.hooks {
            hook.before(&self.station, from, trigger);
        }

        let record = TransitionRecord {
            station: self.station.clone(),
            from,
            to,
            trigger,
            timestamp: Utc::now(),
            reason: reason.into(),
            classification: classification.filter(|_| to == ConnectionState::Error),
        };

        self.state = to;
        self.last_change = record.timestamp;
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(record.clone());

        if to == ConnectionState::Error {
            warn!("{}: {} -> {} ({})", self.station, from, to, record.reason);
        } else {
            info!("{}: {} -> {} ({})", self.station, from, to, record.reason);
        }

        for hook in &self.hooks {
            hook.after(&record);
        }
        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    fn expected(from: ConnectionState, trigger: Trigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (from, trigger) {
            (Offline | Error, Trigger::Connect) => Some(Connecting),
            (Connecting, Trigger::ArEstablished) => Some(Discovery),
            (Discovery, Trigger::DiscoveryComplete) => Some(Running),
            (Running | Error, Trigger::Disconnect) => Some(Offline),
            (Connecting, Trigger::ConnectionFailed) => Some(Error),
            (Discovery, Trigger::DiscoveryFailed) => Some(Error),
            (Running, Trigger::CommFailure) => Some(Error),
            (Connecting | Discovery, Trigger::Abort) => Some(Offline),
            _ => None,
        }
    }

    fn machine_in(state: ConnectionState) -> StateMachine {
        let mut sm = StateMachine::new("rtu-01");
        sm.state = state;
        sm
    }

    #[test]
    fn test_all_pairs() {
        for from in ConnectionState::ALL {
            for trigger in Trigger::ALL {
                let mut sm = machine_in(from);
                let result = sm.fire(trigger, "test", None);
                match expected(from, trigger) {
                    Some(to) => {
                        let record = result.unwrap();
                        assert_eq!((record.from, record.to), (from, to));
                        assert_eq!(sm.state(), to);
                    },
                    None => {
                        assert!(matches!(result, Err(PnioError::InvalidTransition { .. })));
                        assert_eq!(sm.state(), from, "{trigger} from {from}");
                        assert!(sm.history().is_empty());
                    },
                }
            }
        }
    }

    #[test]
    fn test_error_records_classification() {
        let mut sm = machine_in(ConnectionState::Running);
        let c = ErrorClassification::communication_loss(3);
        let record = sm
            .fire(Trigger::CommFailure, "cyclic data lost", Some(c.clone()))
            .unwrap();
        assert_eq!(record.classification, Some(c));
        assert_eq!(record.reason, "cyclic data lost");

        let record = sm
            .fire(
                Trigger::Disconnect,
                "operator",
                Some(ErrorClassification::communication_loss(1)),
            )
            .unwrap();
        assert_eq!(record.classification, None);
    }

    #[traced_test]
    #[test]
    fn test_transitions_are_logged() {
        let mut sm = machine_in(ConnectionState::Connecting);
        sm.fire(
            Trigger::ConnectionFailed,
            "device rejection",
            Some(ErrorClassification::communication_loss(3)),
        )
        .unwrap();
        assert!(logs_contain("rtu-01: CONNECTING -> ERROR (device rejection)"));

        assert!(sm.fire(Trigger::CommFailure, "x", None).is_err());
        assert!(logs_contain("rtu-01: rejected"));
    }

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl TransitionHook for Recorder {
        fn before(&self, station: &str, from: ConnectionState, trigger: Trigger) {
            self.0.lock().push(format!("before {station} {from} {trigger}"));
        }

        fn after(&self, record: &TransitionRecord) {
            self.0.lock().push(format!("after {}", record.to));
        }
    }

    #[test]
    fn test_hooks_only_on_accepted_transitions() {
        let recorder = Arc::new(Recorder::default());
        let mut sm = StateMachine::new("rtu-01");
        sm.add_hook(recorder.clone());

        assert!(sm.fire(Trigger::Disconnect, "x", None).is_err());
        sm.fire(Trigger::Connect, "x", None).unwrap();

        assert_eq!(
            *recorder.0.lock(),
            vec![
                "before rtu-01 OFFLINE connect".to_string(),
                "after CONNECTING".to_string()
            ]
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let mut sm = StateMachine::new("rtu-01");
        for _ in 0..40 {
            sm.fire(Trigger::Connect, "x", None).unwrap();
            sm.fire(Trigger::Abort, "x", None).unwrap();
        }
        let history = sm.history();
        assert_eq!(history.len(), HISTORY_LEN);
        assert_eq!(history.last().unwrap().trigger, Trigger::Abort);
    }

    fn any_trigger() -> impl Strategy<Value = Trigger> {
        prop::sample::select(Trigger::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_state_follows_table(triggers in prop::collection::vec(any_trigger(), 0..64)) {
            let mut sm = StateMachine::new("rtu-01");
            let mut model = ConnectionState::Offline;
            for trigger in triggers {
                let accepted = sm.fire(trigger, "prop", None).is_ok();
                match expected(model, trigger) {
                    Some(to) => {
                        prop_assert!(accepted);
                        model = to;
                    },
                    None => prop_assert!(!accepted),
                }
                prop_assert_eq!(sm.state(), model);
            }
        }
    }
}
