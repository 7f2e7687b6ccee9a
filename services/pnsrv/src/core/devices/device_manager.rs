//! Device manager
//!
//! Owns one [`StateMachine`] per station name and the session task of every
//! device with an active connection. The device table (including the single
//! CONNECTING slot) sits behind one mutex; every state transition is applied
//! while holding it, so transitions of one device are serialized and the
//! CONNECTING slot changes atomically with them.
//!
//! ```text
//! connect() ──spawn──► session task
//!                        open transport
//!                        establish ─────────── CONNECTING -> DISCOVERY | ERROR
//!                        first input frame ─── DISCOVERY  -> RUNNING   | ERROR
//!                        cyclic loop ───────── RUNNING    -> ERROR (comm_failure)
//!                        cancelled ─────────── release (RUNNING only), close
//! ```
//!
//! `abort` and `disconnect` cancel the task, wait for it to close the
//! transport and only then apply their transition. Concurrent stoppers all
//! wait for the same task; `connect` is refused until the stop has finished.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state_machine::{ConnectionState, StateMachine, TransitionHook, TransitionRecord, Trigger};
use super::types::{
    apply_module_diff, DeviceEvent, DeviceSnapshot, OutputCommand, Reading, SessionInfo,
    SlotInventory, SlotState,
};
use crate::core::config::{validate_device, ControllerConfig, DeviceConfig, SlotDirection};
use crate::core::transport::{DeviceEndpoint, TransportFactory};
use crate::error::{PnioError, Result};
use crate::protocols::profinet::connection::{
    self, establish, ConnectionTarget, EngineConfig, SessionParams,
};
use crate::protocols::profinet::cyclic::{CycleOutcome, CyclicEngine, CyclicStats};
use crate::protocols::profinet::dcp::{self, DiscoveredDevice};
use crate::protocols::profinet::resilience::ErrorClassification;
use crate::protocols::profinet::rt::SlotValue;

/// Capacity of the event broadcast channel
pub const EVENT_CAPACITY: usize = 1024;
const COMMAND_QUEUE_LEN: usize = 64;

/// Publishes every accepted transition on the event channel
#[derive(Debug)]
struct EventHook {
    events: broadcast::Sender<DeviceEvent>,
}

impl TransitionHook for EventHook {
    fn after(&self, record: &TransitionRecord) {
        // No subscribers is fine
        let _ = self.events.send(DeviceEvent::StateChanged(record.clone()));
    }
}

#[derive(Debug)]
struct SessionTask {
    id: u64,
    cancel: CancellationToken,
    commands: mpsc::Sender<OutputCommand>,
    /// Flips to `true` once the task has closed its transport and returned
    finished: watch::Receiver<bool>,
}

#[derive(Debug)]
struct DeviceEntry {
    config: DeviceConfig,
    machine: StateMachine,
    last_error: Option<String>,
    mac: Option<[u8; 6]>,
    inventory: Vec<SlotInventory>,
    session: Option<SessionInfo>,
    stats: Option<CyclicStats>,
    readings: BTreeMap<u16, Reading>,
    /// Survive reconnects so readings stay ordered for the lifetime of the entry
    sequences: HashMap<u16, u64>,
    task: Option<SessionTask>,
    sessions_started: u64,
    /// Set by the first `abort`/`disconnect` until its transition is applied
    stopping: bool,
}

impl DeviceEntry {
    fn new(config: DeviceConfig, hook: Arc<dyn TransitionHook>) -> Self {
        let mut machine = StateMachine::new(config.station_name.clone());
        machine.add_hook(hook);
        let inventory = config
            .slots
            .iter()
            .map(|s| SlotInventory {
                slot: s.slot,
                expected_module: s.module_ident,
                expected_submodule: s.submodule_ident,
                discovered_module: None,
                state: SlotState::Unknown,
            })
            .collect();
        Self {
            mac: config.mac.as_deref().and_then(crate::core::config::parse_mac),
            config,
            machine,
            last_error: None,
            inventory,
            session: None,
            stats: None,
            readings: BTreeMap::new(),
            sequences: HashMap::new(),
            task: None,
            sessions_started: 0,
            stopping: false,
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            station_name: self.config.station_name.clone(),
            ip: self.config.ip,
            mac: self.mac.as_ref().map(common::hex::mac),
            vendor_id: self.config.vendor_id,
            device_id: self.config.device_id,
            state: self.machine.state(),
            last_error: self.last_error.clone(),
            last_change: self.machine.last_change(),
            last_transition: self.machine.last_transition().cloned(),
            history: self.machine.history(),
            inventory: self.inventory.clone(),
            session: self.session.clone(),
            stats: self.stats.clone(),
            readings: self.readings.clone(),
        }
    }

    /// Whether at least one configured input slot was not reported missing
    fn has_input_present(&self) -> bool {
        self.config
            .slots
            .iter()
            .filter(|s| s.direction == SlotDirection::Input)
            .any(|s| {
                self.inventory
                    .iter()
                    .any(|e| e.slot == s.slot && e.state != SlotState::Missing)
            })
    }

    fn fire(
        &mut self,
        trigger: Trigger,
        reason: impl Into<String>,
        classification: Option<ErrorClassification>,
    ) -> Result<TransitionRecord> {
        let record = self.machine.fire(trigger, reason, classification)?;
        if record.to != ConnectionState::Running {
            self.readings.clear();
        }
        if record.to.is_idle() {
            self.session = None;
        }
        if record.to == ConnectionState::Error {
            self.last_error = Some(match &record.classification {
                Some(c) => c.describe(),
                None => record.reason.clone(),
            });
        }
        Ok(record)
    }
}

#[derive(Debug, Default)]
struct DeviceTable {
    devices: HashMap<String, DeviceEntry>,
    /// Station currently in CONNECTING, at most one
    connecting: Option<String>,
}

impl DeviceTable {
    fn entry(&mut self, station: &str) -> Result<&mut DeviceEntry> {
        self.devices
            .get_mut(station)
            .ok_or_else(|| PnioError::DeviceNotFound(station.to_string()))
    }

    fn release_connecting(&mut self, station: &str) {
        if self.connecting.as_deref() == Some(station) {
            self.connecting = None;
        }
    }
}

#[derive(Debug)]
struct ManagerInner {
    table: Mutex<DeviceTable>,
    factory: Arc<dyn TransportFactory>,
    controller: ControllerConfig,
    engine: EngineConfig,
    events: broadcast::Sender<DeviceEvent>,
    hook: Arc<EventHook>,
}

/// What the session task reports back to the `connect` caller
type ConnectOutcome = oneshot::Sender<Result<()>>;

/// Device manager, cheap to clone
#[derive(Debug, Clone)]
pub struct DeviceManager {
    inner: Arc<ManagerInner>,
}

impl DeviceManager {
    pub fn new(factory: Arc<dyn TransportFactory>, controller: ControllerConfig) -> Self {
        let engine = EngineConfig::from_controller(&controller);
        Self::with_engine(factory, controller, engine)
    }

    pub fn with_engine(
        factory: Arc<dyn TransportFactory>,
        controller: ControllerConfig,
        engine: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let hook = Arc::new(EventHook {
            events: events.clone(),
        });
        Self {
            inner: Arc::new(ManagerInner {
                table: Mutex::new(DeviceTable::default()),
                factory,
                controller,
                engine,
                events,
                hook,
            }),
        }
    }

    /// Register a device in OFFLINE
    ///
    /// The configuration goes through the same checks as a loaded file.
    pub fn add(&self, config: DeviceConfig) -> Result<()> {
        validate_device(&config)?;
        let mut table = self.inner.table.lock();
        if table.devices.contains_key(&config.station_name) {
            return Err(PnioError::DeviceExists(config.station_name));
        }
        info!("{}: added ({})", config.station_name, config.ip);
        let name = config.station_name.clone();
        let entry = DeviceEntry::new(config, self.inner.hook.clone());
        table.devices.insert(name, entry);
        Ok(())
    }

    /// Remove a device; only while OFFLINE or ERROR
    pub fn remove(&self, station: &str) -> Result<()> {
        let mut table = self.inner.table.lock();
        let entry = table.entry(station)?;
        let state = entry.machine.state();
        if !state.is_idle() {
            return Err(PnioError::InvalidState {
                station: station.to_string(),
                state,
                operation: "remove",
            });
        }
        table.devices.remove(station);
        info!("{}: removed", station);
        Ok(())
    }

    /// Connect a device and wait until it is RUNNING, has failed, or was aborted
    ///
    /// Rejected with [`PnioError::Busy`] while another device is CONNECTING.
    pub async fn connect(&self, station: &str) -> Result<()> {
        let outcome = {
            let mut guard = self.inner.table.lock();
            let table = &mut *guard;
            if !table.devices.contains_key(station) {
                return Err(PnioError::DeviceNotFound(station.to_string()));
            }
            if let Some(holder) = table.connecting.as_deref() {
                if holder != station {
                    debug!("{}: connect rejected, {} is connecting", station, holder);
                    return Err(PnioError::Busy(holder.to_string()));
                }
            }
            let entry = table.entry(station)?;
            if entry.stopping {
                return Err(PnioError::InvalidState {
                    station: station.to_string(),
                    state: entry.machine.state(),
                    operation: "connect",
                });
            }
            entry.fire(Trigger::Connect, "connect requested", None)?;
            entry.stats = None;

            let target = ConnectionTarget::from_config(&entry.config, &self.inner.controller);
            let cancel = CancellationToken::new();
            let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_LEN);
            let (outcome_tx, outcome_rx) = oneshot::channel();
            let (finished_tx, finished_rx) = watch::channel(false);
            let session = run_session(
                self.clone(),
                target,
                cancel.clone(),
                commands_rx,
                outcome_tx,
            );
            tokio::spawn(async move {
                session.await;
                let _ = finished_tx.send(true);
            });
            entry.sessions_started += 1;
            // A task left over from a failed session has already finished
            entry.task = Some(SessionTask {
                id: entry.sessions_started,
                cancel,
                commands: commands_tx,
                finished: finished_rx,
            });
            table.connecting = Some(station.to_string());
            outcome_rx
        };

        match outcome.await {
            Ok(result) => result,
            Err(_) => Err(PnioError::Aborted(station.to_string())),
        }
    }

    /// Stop the cyclic exchange of a RUNNING device (or clear an ERROR)
    ///
    /// Returns once the session task has released the AR and closed its transport.
    pub async fn disconnect(&self, station: &str) -> Result<()> {
        self.stop(station, Trigger::Disconnect, "disconnect requested")
            .await
    }

    /// Cancel a connection in CONNECTING or DISCOVERY
    ///
    /// Returns once the transport is closed and the device is OFFLINE.
    pub async fn abort(&self, station: &str) -> Result<()> {
        self.stop(station, Trigger::Abort, "abort requested").await
    }

    async fn stop(&self, station: &str, trigger: Trigger, reason: &str) -> Result<()> {
        let (session, finished) = {
            let mut table = self.inner.table.lock();
            let entry = table.entry(station)?;
            if !entry.machine.can_fire(trigger) {
                return Err(PnioError::InvalidState {
                    station: station.to_string(),
                    state: entry.machine.state(),
                    operation: trigger.as_str(),
                });
            }
            entry.stopping = true;
            match &entry.task {
                Some(task) => {
                    task.cancel.cancel();
                    (Some(task.id), Some(task.finished.clone()))
                },
                None => (None, None),
            }
        };

        if let Some(mut finished) = finished {
            // A closed channel means the task is gone without reporting
            if finished.wait_for(|done| *done).await.is_err() {
                warn!("{}: session task ended abnormally", station);
            }
        }

        let mut table = self.inner.table.lock();
        let entry = table.entry(station)?;
        // A concurrent stop of the same session may have completed first
        if entry.task.as_ref().map(|t| t.id) != session
            || entry.machine.state() == ConnectionState::Offline
        {
            return Ok(());
        }
        let fired = entry.fire(trigger, reason, None);
        entry.stopping = false;
        if fired.is_ok() {
            entry.task = None;
        }
        table.release_connecting(station);
        fired.map(|_| ())
    }

    /// Latest reading per slot, ordered by slot
    pub fn latest_readings(&self, station: &str) -> Result<Vec<Reading>> {
        let mut table = self.inner.table.lock();
        Ok(table.entry(station)?.readings.values().cloned().collect())
    }

    /// Queue an output value; it goes out with the next cycle
    pub fn command(&self, station: &str, slot: u16, value: f32) -> Result<()> {
        let mut table = self.inner.table.lock();
        let entry = table.entry(station)?;
        let state = entry.machine.state();
        let sender = match (&entry.task, state) {
            (Some(task), ConnectionState::Running) => task.commands.clone(),
            _ => {
                return Err(PnioError::InvalidState {
                    station: station.to_string(),
                    state,
                    operation: "command",
                })
            },
        };
        let is_output = entry
            .config
            .slots
            .iter()
            .any(|s| s.slot == slot && s.direction == SlotDirection::Output);
        if !is_output {
            return Err(PnioError::CommandError(format!(
                "{station}: slot {slot} is not an output slot"
            )));
        }
        if !value.is_finite() {
            return Err(PnioError::CommandError(format!(
                "{station}: slot {slot}: value must be finite"
            )));
        }
        sender
            .try_send(OutputCommand { slot, value })
            .map_err(|e| PnioError::CommandError(format!("{station}: {e}")))
    }

    pub fn state(&self, station: &str) -> Result<ConnectionState> {
        let mut table = self.inner.table.lock();
        Ok(table.entry(station)?.machine.state())
    }

    pub fn snapshot(&self, station: &str) -> Result<DeviceSnapshot> {
        let mut table = self.inner.table.lock();
        Ok(table.entry(station)?.snapshot())
    }

    /// Snapshots of all devices, ordered by station name
    pub fn list(&self) -> Vec<DeviceSnapshot> {
        let table = self.inner.table.lock();
        let mut all: Vec<_> = table.devices.values().map(DeviceEntry::snapshot).collect();
        all.sort_by(|a, b| a.station_name.cmp(&b.station_name));
        all
    }

    /// Station currently holding the CONNECTING slot
    pub fn connecting(&self) -> Option<String> {
        self.inner.table.lock().connecting.clone()
    }

    /// Stations flagged for automatic connection with their current state
    pub fn auto_connect_devices(&self) -> Vec<(String, ConnectionState)> {
        let table = self.inner.table.lock();
        let mut devices: Vec<_> = table
            .devices
            .values()
            .filter(|e| e.config.auto_connect)
            .map(|e| (e.config.station_name.clone(), e.machine.state()))
            .collect();
        devices.sort_by(|a, b| a.0.cmp(&b.0));
        devices
    }

    /// DCP Identify on a dedicated link transport
    ///
    /// Does not touch the device table, so cyclic exchange continues meanwhile.
    pub async fn discover(
        &self,
        timeout: Duration,
        name_filter: Option<&str>,
    ) -> Result<Vec<DiscoveredDevice>> {
        let mut link = self.inner.factory.open_link().await?;
        let result = dcp::discover(link.as_mut(), timeout, name_filter).await;
        let _ = link.close().await;
        let devices = result?;
        info!("Discovery found {} device(s)", devices.len());
        Ok(devices)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    /// Abort connecting devices and disconnect running ones, all at once
    pub async fn shutdown_all(&self) {
        let states: Vec<(String, ConnectionState)> = {
            let table = self.inner.table.lock();
            table
                .devices
                .iter()
                .map(|(name, e)| (name.clone(), e.machine.state()))
                .collect()
        };
        let stops = states.into_iter().map(|(station, state)| async move {
            let result = match state {
                ConnectionState::Connecting | ConnectionState::Discovery => {
                    self.abort(&station).await
                },
                ConnectionState::Running => self.disconnect(&station).await,
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!("{}: shutdown: {}", station, e);
            }
        });
        join_all(stops).await;
    }

    // ------------------------------------------------------------------------
    // Session task callbacks; all of them are no-ops once the task is cancelled
    // ------------------------------------------------------------------------

    fn transition_from_task(
        &self,
        station: &str,
        cancel: &CancellationToken,
        trigger: Trigger,
        classification: ErrorClassification,
    ) -> bool {
        let mut table = self.inner.table.lock();
        if cancel.is_cancelled() {
            return false;
        }
        let Ok(entry) = table.entry(station) else {
            return false;
        };
        let reason = classification.to_string();
        let applied = entry.fire(trigger, reason, Some(classification)).is_ok();
        table.release_connecting(station);
        applied
    }

    fn enter_discovery(
        &self,
        station: &str,
        cancel: &CancellationToken,
        params: &SessionParams,
    ) -> bool {
        let mut table = self.inner.table.lock();
        if cancel.is_cancelled() {
            return false;
        }
        let Ok(entry) = table.entry(station) else {
            return false;
        };
        let reason = format!(
            "AR established ({}, {} attempt(s))",
            params.strategy, params.attempts
        );
        if entry.fire(Trigger::ArEstablished, reason, None).is_err() {
            return false;
        }
        entry.mac = Some(params.device_mac);
        apply_module_diff(&mut entry.inventory, params.module_diff.as_ref());
        entry.session = Some(SessionInfo {
            ar_uuid: params.ar_uuid,
            input_frame_id: params.input_frame_id,
            output_frame_id: params.output_frame_id,
            cycle_time_ms: params.cycle_time().as_millis() as u64,
            strategy: params.strategy,
            connected_at: chrono::Utc::now(),
        });
        entry.stats = Some(CyclicStats::default());
        table.release_connecting(station);
        true
    }

    fn complete_discovery(
        &self,
        station: &str,
        cancel: &CancellationToken,
        values: &[SlotValue],
        stats: &CyclicStats,
    ) -> DiscoveryResult {
        let mut table = self.inner.table.lock();
        if cancel.is_cancelled() {
            return DiscoveryResult::Cancelled;
        }
        let Ok(entry) = table.entry(station) else {
            return DiscoveryResult::Cancelled;
        };
        if !entry.has_input_present() {
            let c = ErrorClassification::discovery("no expected input slot present");
            let reason = c.to_string();
            if let Err(e) = entry.fire(Trigger::DiscoveryFailed, reason, Some(c.clone())) {
                warn!("{}: {}", station, e);
                return DiscoveryResult::Cancelled;
            }
            return DiscoveryResult::Failed(c);
        }
        if entry
            .fire(Trigger::DiscoveryComplete, "first input frame received", None)
            .is_err()
        {
            return DiscoveryResult::Cancelled;
        }
        entry.last_error = None;
        self.store_readings(entry, values, stats);
        DiscoveryResult::Running
    }

    fn publish(
        &self,
        station: &str,
        cancel: &CancellationToken,
        values: &[SlotValue],
        stats: &CyclicStats,
    ) {
        let mut table = self.inner.table.lock();
        if cancel.is_cancelled() {
            return;
        }
        let Ok(entry) = table.entry(station) else {
            return;
        };
        if entry.machine.state() == ConnectionState::Running {
            self.store_readings(entry, values, stats);
        }
    }

    fn update_stats(&self, station: &str, stats: &CyclicStats) {
        let mut table = self.inner.table.lock();
        if let Ok(entry) = table.entry(station) {
            entry.stats = Some(stats.clone());
        }
    }

    fn store_readings(&self, entry: &mut DeviceEntry, values: &[SlotValue], stats: &CyclicStats) {
        let timestamp = chrono::Utc::now();
        for v in values {
            let seq = entry.sequences.entry(v.slot).or_insert(0);
            *seq += 1;
            let reading = Reading {
                slot: v.slot,
                value: f64::from(v.value),
                quality: v.quality,
                timestamp,
                sequence: *seq,
            };
            entry.readings.insert(v.slot, reading.clone());
            let _ = self.inner.events.send(DeviceEvent::Reading {
                station: entry.config.station_name.clone(),
                reading,
            });
        }
        entry.stats = Some(stats.clone());
    }
}

enum DiscoveryResult {
    Running,
    Failed(ErrorClassification),
    Cancelled,
}

fn fail_connect(
    manager: &DeviceManager,
    station: &str,
    cancel: &CancellationToken,
    trigger: Trigger,
    classification: ErrorClassification,
    outcome: ConnectOutcome,
) {
    if manager.transition_from_task(station, cancel, trigger, classification.clone()) {
        let _ = outcome.send(Err(PnioError::ConnectFailed {
            station: station.to_string(),
            classification,
        }));
    }
}

/// One device session: establish, discovery, cyclic exchange
async fn run_session(
    manager: DeviceManager,
    target: ConnectionTarget,
    cancel: CancellationToken,
    mut commands: mpsc::Receiver<OutputCommand>,
    outcome: ConnectOutcome,
) {
    let station = target.station_name.clone();
    let endpoint = DeviceEndpoint {
        station_name: station.clone(),
        ip: target.ip,
        mac: target.mac,
    };

    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        r = manager.inner.factory.open_device(&endpoint) => r,
    };
    let transport = match opened {
        Ok(t) => t,
        Err(e) => {
            let c = ErrorClassification::transport(&e);
            fail_connect(&manager, &station, &cancel, Trigger::ConnectionFailed, c, outcome);
            return;
        },
    };

    // Dropping the establish future on cancellation drops (and closes) the transport
    let established = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        r = establish(transport, &target, &manager.inner.engine) => r,
    };
    let established = match established {
        Ok(est) => est,
        Err(failure) => {
            warn!("{}: {}", station, failure);
            fail_connect(
                &manager,
                &station,
                &cancel,
                Trigger::ConnectionFailed,
                failure.classification,
                outcome,
            );
            return;
        },
    };

    let mut transport = established.transport;
    if !manager.enter_discovery(&station, &cancel, &established.params) {
        let _ = transport.close().await;
        return;
    }
    let params = established.params;
    let cycle_time = params.cycle_time();
    let mut engine = CyclicEngine::new(
        transport,
        params.clone(),
        manager.inner.controller.missed_cycle_threshold,
    );
    let mut ticker = tokio::time::interval(cycle_time);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // DISCOVERY: wait for the first valid input frame
    let deadline =
        Instant::now() + Duration::from_millis(manager.inner.controller.discovery_timeout_ms);
    let first = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = engine.transport_mut().close().await;
                return;
            },
            _ = ticker.tick() => {},
        }
        if Instant::now() >= deadline {
            break Err(ErrorClassification::discovery(format!(
                "no valid input frame within {} ms",
                manager.inner.controller.discovery_timeout_ms
            )));
        }
        let cycle = tokio::select! {
            biased;
            () = cancel.cancelled() => continue,
            r = engine.run_cycle() => r,
        };
        match cycle {
            Ok(CycleOutcome::Input(values)) => break Ok(values),
            Ok(_) => continue,
            Err(e) => break Err(ErrorClassification::transport(&e)),
        }
    };

    let result = match first {
        Ok(values) => manager.complete_discovery(&station, &cancel, &values, engine.stats()),
        Err(c) => {
            if manager.transition_from_task(&station, &cancel, Trigger::DiscoveryFailed, c.clone()) {
                DiscoveryResult::Failed(c)
            } else {
                DiscoveryResult::Cancelled
            }
        },
    };
    match result {
        DiscoveryResult::Running => {
            let _ = outcome.send(Ok(()));
        },
        DiscoveryResult::Failed(classification) => {
            release(&mut engine, &params, &manager).await;
            let _ = engine.transport_mut().close().await;
            let _ = outcome.send(Err(PnioError::ConnectFailed {
                station: station.clone(),
                classification,
            }));
            return;
        },
        DiscoveryResult::Cancelled => {
            let _ = engine.transport_mut().close().await;
            return;
        },
    }

    // RUNNING
    let loss = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                release(&mut engine, &params, &manager).await;
                let _ = engine.transport_mut().close().await;
                debug!("{}: session stopped", station);
                return;
            },
            Some(cmd) = commands.recv() => {
                if let Err(e) = engine.queue_command(cmd.slot, cmd.value) {
                    warn!("{}: {}", station, e);
                }
                continue;
            },
            _ = ticker.tick() => {},
        }
        let cycle = tokio::select! {
            biased;
            () = cancel.cancelled() => continue,
            r = engine.run_cycle() => r,
        };
        match cycle {
            Ok(CycleOutcome::Input(values)) => {
                manager.publish(&station, &cancel, &values, engine.stats());
            },
            Ok(CycleOutcome::Missed { consecutive }) => {
                debug!("{}: cycle missed ({} in a row)", station, consecutive);
                manager.update_stats(&station, engine.stats());
            },
            Ok(CycleOutcome::Lost { consecutive }) => {
                break ErrorClassification::communication_loss(consecutive);
            },
            Err(e) => break ErrorClassification::transport(&e),
        }
    };

    manager.update_stats(&station, engine.stats());
    let _ = engine.transport_mut().close().await;
    manager.transition_from_task(&station, &cancel, Trigger::CommFailure, loss);
}

async fn release(engine: &mut CyclicEngine, params: &SessionParams, manager: &DeviceManager) {
    connection::release(
        engine.transport_mut(),
        params.ar_uuid,
        params.session_key,
        params.object_uuid,
        manager.inner.engine.step_timeout,
    )
    .await;
}
