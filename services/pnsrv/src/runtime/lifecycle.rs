//! Runtime lifecycle management
//!
//! Background supervisor that keeps `auto_connect` devices connected, and
//! the orderly stop of supervisor and device sessions on shutdown.
//!
//! ```text
//! ┌───────────────┐  every scan_interval  ┌──────────────────────────┐
//! │  Supervisor   │──────────────────────►│ auto_connect devices     │
//! │  (one task)   │                       │ OFFLINE (never tried) or │
//! └───────────────┘                       │ ERROR, backoff elapsed   │
//!         │                               └──────────────────────────┘
//!         ▼                                            │
//! ┌───────────────┐                                    │
//! │ ReconnectHelper per station ◄──────────────────────┘
//! └───────────────┘   DeviceManager::connect (one at a time)
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reconnect::{ReconnectError, ReconnectHelper, ReconnectPolicy, ReconnectState};
use crate::core::config::ReconnectConfig;
use crate::core::devices::{ConnectionState, DeviceManager};

/// Reconnect bookkeeping for all `auto_connect` devices
#[derive(Debug)]
pub struct Supervisor {
    manager: DeviceManager,
    policy: ReconnectPolicy,
    helpers: HashMap<String, ReconnectHelper>,
}

impl Supervisor {
    pub fn new(manager: DeviceManager, policy: ReconnectPolicy) -> Self {
        Self {
            manager,
            policy,
            helpers: HashMap::new(),
        }
    }

    pub fn helper(&self, station: &str) -> Option<&ReconnectHelper> {
        self.helpers.get(station)
    }

    /// One pass over the `auto_connect` devices
    ///
    /// Devices are connected one after another; OFFLINE devices are only
    /// picked up until the supervisor has tried them once, so an explicit
    /// disconnect or abort sticks.
    pub async fn scan(&mut self) {
        let devices = self.manager.auto_connect_devices();
        self.helpers
            .retain(|station, _| devices.iter().any(|(name, _)| name == station));

        for (station, state) in devices {
            let helper = self
                .helpers
                .entry(station.clone())
                .or_insert_with(|| ReconnectHelper::new(self.policy.clone()));

            match state {
                ConnectionState::Running => {
                    if helper.state() != ReconnectState::Connected {
                        helper.mark_connected();
                    }
                    continue;
                },
                ConnectionState::Connecting | ConnectionState::Discovery => continue,
                ConnectionState::Offline if helper.has_history() => continue,
                ConnectionState::Error if helper.state() == ReconnectState::Connected => {
                    info!("{}: session lost, scheduling reconnect", station);
                    helper.mark_disconnected();
                },
                ConnectionState::Offline | ConnectionState::Error => {},
            }

            if !helper.is_due(Instant::now()) {
                continue;
            }

            let manager = &self.manager;
            match helper
                .execute_reconnect(|| manager.connect(&station))
                .await
            {
                Ok(()) => info!("{}: running", station),
                Err(ReconnectError::Busy(holder)) => {
                    debug!("{}: deferred, {} is connecting", station, holder);
                },
                Err(ReconnectError::MaxAttemptsExceeded) => {
                    warn!("{}: giving up after repeated failures", station);
                },
                Err(ReconnectError::NotDue) => {},
                Err(ReconnectError::ConnectionFailed(reason)) => {
                    if let Some(delay) = helper.next_delay() {
                        warn!("{}: {}; retry in {:?}", station, reason, delay);
                    } else {
                        warn!("{}: {}; no retries left", station, reason);
                    }
                },
            }
        }
    }
}

/// Start the auto-connect supervisor
///
/// Returns the task handle and the token that stops it. A disabled reconnect
/// configuration still connects each device once.
pub fn start_supervisor(
    manager: DeviceManager,
    config: &ReconnectConfig,
) -> (JoinHandle<()>, CancellationToken) {
    let token = CancellationToken::new();
    let task_token = token.clone();
    let mut policy = ReconnectPolicy::from_config(config);
    if !config.enabled {
        policy.max_attempts = 1;
    }
    let scan_interval = Duration::from_millis(config.scan_interval_ms.max(10));

    let handle = tokio::spawn(async move {
        let mut supervisor = Supervisor::new(manager, policy);
        let mut interval = tokio::time::interval(scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tokio::select! {
                        () = supervisor.scan() => {}
                        () = task_token.cancelled() => break,
                    }
                }
                () = task_token.cancelled() => break,
            }
        }

        info!("Supervisor terminated");
    });

    (handle, token)
}

/// Why the service is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// The supervisor task ended on its own
    SupervisorExited,
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}. Only Ctrl+C stops pnsrv", e);
                std::future::pending::<()>().await;
            },
        }
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

/// Serve until Ctrl+C, SIGTERM or the end of the supervisor, then stop
///
/// The supervisor is stopped first so nothing reconnects while the sessions
/// are torn down.
pub async fn serve_until_shutdown(
    manager: &DeviceManager,
    mut supervisor: JoinHandle<()>,
    supervisor_token: CancellationToken,
) -> ShutdownReason {
    let reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => ShutdownReason::Interrupt,
        () = terminate_signal() => ShutdownReason::Terminate,
        result = &mut supervisor => {
            if let Err(e) = result {
                error!("Supervisor task failed: {}", e);
            }
            ShutdownReason::SupervisorExited
        },
    };
    info!("Shutdown requested: {:?}", reason);

    supervisor_token.cancel();
    if reason != ShutdownReason::SupervisorExited {
        if let Err(e) = supervisor.await {
            error!("Supervisor task failed: {}", e);
        }
    }
    shutdown_handler(manager).await;
    reason
}

/// Stop every device session concurrently
pub async fn shutdown_handler(manager: &DeviceManager) {
    let active = manager
        .list()
        .iter()
        .filter(|d| !d.state.is_idle())
        .count();
    if active == 0 {
        info!("No device sessions to stop");
        return;
    }

    info!("Stopping {} device session(s) concurrently...", active);
    manager.shutdown_all().await;

    let left = manager
        .list()
        .iter()
        .filter(|d| !d.state.is_idle())
        .count();
    if left == 0 {
        info!("Shutdown completed: {} session(s) stopped", active);
    } else {
        warn!("Shutdown completed: {} session(s) still active", left);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::config::{ControllerConfig, DeviceConfig, SlotConfig};
    use crate::core::transport::mock::{MockNetwork, SimulatedRtu, STATUS_TIMING_REJECTED};
    use crate::protocols::profinet::connection::EngineConfig;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn device(name: &str, last: u8, auto_connect: bool) -> DeviceConfig {
        let mut cfg = DeviceConfig::new(
            name,
            Ipv4Addr::new(192, 168, 1, last),
            vec![SlotConfig::input(1, 0x10, 0x11)],
        );
        cfg.auto_connect = auto_connect;
        cfg.cycle_time_ms = Some(4);
        cfg
    }

    fn setup(devices: &[DeviceConfig]) -> (MockNetwork, DeviceManager) {
        let network = MockNetwork::new();
        for d in devices {
            network.add_device(SimulatedRtu::from_config(d));
        }
        let controller = ControllerConfig {
            discovery_timeout_ms: 500,
            ..ControllerConfig::default()
        };
        let engine = EngineConfig {
            step_timeout: Duration::from_millis(100),
            ..EngineConfig::from_controller(&controller)
        };
        let manager =
            DeviceManager::with_engine(Arc::new(network.factory()), controller, engine);
        for d in devices {
            manager.add(d.clone()).unwrap();
        }
        (network, manager)
    }

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 0,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_scan_connects_auto_devices_only() {
        let (_network, manager) =
            setup(&[device("rtu-01", 10, true), device("rtu-02", 11, false)]);
        let mut supervisor = Supervisor::new(manager.clone(), policy());

        supervisor.scan().await;
        assert_eq!(manager.state("rtu-01").unwrap(), ConnectionState::Running);
        assert_eq!(manager.state("rtu-02").unwrap(), ConnectionState::Offline);
        assert_eq!(
            supervisor.helper("rtu-01").unwrap().state(),
            ReconnectState::Connected
        );
        assert!(supervisor.helper("rtu-02").is_none());
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_explicit_disconnect_sticks() {
        let (_network, manager) = setup(&[device("rtu-01", 10, true)]);
        let mut supervisor = Supervisor::new(manager.clone(), policy());
        supervisor.scan().await;
        manager.disconnect("rtu-01").await.unwrap();

        supervisor.scan().await;
        assert_eq!(manager.state("rtu-01").unwrap(), ConnectionState::Offline);
    }

    #[tokio::test]
    async fn test_failed_device_waits_for_backoff() {
        let cfg = device("rtu-01", 10, true);
        let (network, manager) = setup(&[cfg]);
        network
            .device("rtu-01")
            .unwrap()
            .reject_connects(Some(STATUS_TIMING_REJECTED));
        let mut supervisor = Supervisor::new(manager.clone(), policy());

        supervisor.scan().await;
        assert_eq!(manager.state("rtu-01").unwrap(), ConnectionState::Error);
        let before = network.device("rtu-01").unwrap().connect_requests();

        // Backoff of 30 s has not elapsed
        supervisor.scan().await;
        assert_eq!(network.device("rtu-01").unwrap().connect_requests(), before);
        assert_eq!(supervisor.helper("rtu-01").unwrap().stats().total_attempts, 1);
    }

    #[tokio::test]
    async fn test_start_supervisor_stops_on_cancel() {
        let (_network, manager) = setup(&[device("rtu-01", 10, true)]);
        let config = ReconnectConfig {
            scan_interval_ms: 20,
            ..ReconnectConfig::default()
        };
        let (handle, token) = start_supervisor(manager.clone(), &config);

        let deadline = Instant::now() + Duration::from_secs(2);
        while manager.state("rtu-01").unwrap() != ConnectionState::Running {
            assert!(Instant::now() < deadline, "device never reached RUNNING");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        handle.await.unwrap();
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_supervisor_exit_stops_running_devices() {
        let (network, manager) = setup(&[device("rtu-01", 10, false)]);
        manager.connect("rtu-01").await.unwrap();
        let token = CancellationToken::new();
        let supervisor = tokio::spawn(async {});

        let reason = serve_until_shutdown(&manager, supervisor, token.clone()).await;
        assert_eq!(reason, ShutdownReason::SupervisorExited);
        assert!(token.is_cancelled());
        assert_eq!(manager.state("rtu-01").unwrap(), ConnectionState::Offline);
        assert_eq!(network.live_transports(), 0);
        assert_eq!(network.device("rtu-01").unwrap().releases(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_handler_without_sessions() {
        let (network, manager) = setup(&[device("rtu-01", 10, false)]);
        shutdown_handler(&manager).await;
        assert_eq!(manager.state("rtu-01").unwrap(), ConnectionState::Offline);
        assert_eq!(network.opened_transports(), 0);
    }
}
