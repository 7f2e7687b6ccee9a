//! Test Common Utilities
//!
//! Simulated network plus a device manager wired to it

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use pnsrv::core::config::{ControllerConfig, DeviceConfig, SlotConfig};
use pnsrv::core::devices::{ConnectionState, DeviceManager};
use pnsrv::core::transport::mock::{MockNetwork, SimulatedRtu};

/// Two inputs (slots 1, 2) and one output (slot 3), 4 ms cycle
pub fn device(name: &str, last_octet: u8) -> DeviceConfig {
    let mut cfg = DeviceConfig::new(
        name,
        Ipv4Addr::new(192, 168, 1, last_octet),
        vec![
            SlotConfig::input(1, 0x10, 0x11),
            SlotConfig::input(2, 0x10, 0x11),
            SlotConfig::output(3, 0x20, 0x21),
        ],
    );
    cfg.cycle_time_ms = Some(4);
    cfg
}

pub fn controller() -> ControllerConfig {
    ControllerConfig {
        step_timeout_ms: 200,
        discovery_timeout_ms: 500,
        ..ControllerConfig::default()
    }
}

pub struct TestRig {
    pub network: MockNetwork,
    pub manager: DeviceManager,
}

impl TestRig {
    pub fn new(devices: &[DeviceConfig], controller: ControllerConfig) -> Self {
        let network = MockNetwork::new();
        for d in devices {
            network.add_device(SimulatedRtu::from_config(d));
        }
        let manager = DeviceManager::new(Arc::new(network.factory()), controller);
        for d in devices {
            manager.add(d.clone()).unwrap();
        }
        Self { network, manager }
    }

    pub fn rtu(&self, station: &str) -> SimulatedRtu {
        self.network.device(station).unwrap()
    }

    /// Poll until `station` reaches `state`; panics after `timeout`
    pub async fn wait_for_state(&self, station: &str, state: ConnectionState, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.manager.state(station).unwrap();
            if current == state {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "{station}: expected {state}, still {current}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
