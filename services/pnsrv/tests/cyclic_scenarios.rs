//! Cyclic exchange scenarios against simulated RTUs

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::time::Duration;

use tokio::time::{timeout, Instant};

use common::{controller, device, TestRig};
use pnsrv::core::config::ControllerConfig;
use pnsrv::core::devices::{ConnectionState, DeviceEvent, Quality, Trigger};
use pnsrv::protocols::profinet::resilience::ErrorKind;

#[tokio::test]
async fn test_dropped_frames_raise_comm_failure() {
    let config = ControllerConfig {
        missed_cycle_threshold: 3,
        ..controller()
    };
    let rig = TestRig::new(&[device("rtu-01", 10)], config);
    let rtu = rig.rtu("rtu-01");
    rtu.set_input(1, 1.5, Quality::Good);
    rig.manager.connect("rtu-01").await.unwrap();
    assert!(!rig.manager.latest_readings("rtu-01").unwrap().is_empty());

    rtu.drop_input_frames(5);
    rig.wait_for_state("rtu-01", ConnectionState::Error, Duration::from_secs(2))
        .await;

    let snap = rig.manager.snapshot("rtu-01").unwrap();
    let record = snap.last_transition.unwrap();
    assert_eq!(record.trigger, Trigger::CommFailure);
    assert_eq!(
        record.classification.unwrap().kind,
        ErrorKind::CommunicationLoss
    );
    assert!(snap.last_error.unwrap().contains("communication loss"));
    assert!(rig.manager.latest_readings("rtu-01").unwrap().is_empty());
    assert!(snap.stats.unwrap().cycles_missed >= 3);
    assert_eq!(rig.network.live_transports(), 0);

    // ERROR accepts a fresh connect
    rig.manager.connect("rtu-01").await.unwrap();
    assert_eq!(rig.manager.state("rtu-01").unwrap(), ConnectionState::Running);
    rig.manager.shutdown_all().await;
}

#[tokio::test]
async fn test_reading_sequences_increase_per_slot() {
    let rig = TestRig::new(&[device("rtu-01", 10)], controller());
    let rtu = rig.rtu("rtu-01");
    rtu.set_input(1, 10.0, Quality::Good);
    rtu.set_input(2, 20.0, Quality::Uncertain);
    rtu.send_duplicates(true);

    let mut events = rig.manager.subscribe();
    rig.manager.connect("rtu-01").await.unwrap();

    let mut last = [0u64; 2];
    let mut seen = 0;
    while seen < 20 {
        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        let DeviceEvent::Reading { station, reading } = event else {
            continue;
        };
        assert_eq!(station, "rtu-01");
        let idx = usize::from(reading.slot - 1);
        assert_eq!(reading.sequence, last[idx] + 1, "slot {}", reading.slot);
        last[idx] = reading.sequence;
        if reading.slot == 2 {
            assert_eq!(reading.quality, Quality::Uncertain);
        }
        seen += 1;
    }

    let snap = rig.manager.snapshot("rtu-01").unwrap();
    assert!(snap.stats.unwrap().frames_discarded > 0);
    rig.manager.shutdown_all().await;
}

#[tokio::test]
async fn test_command_reaches_device() {
    let rig = TestRig::new(&[device("rtu-01", 10)], controller());
    let rtu = rig.rtu("rtu-01");
    rig.manager.connect("rtu-01").await.unwrap();

    rig.manager.command("rtu-01", 3, 42.5).unwrap();
    let deadline = Instant::now() + Duration::from_secs(1);
    while rtu.last_output(3) != Some(42.5) {
        assert!(Instant::now() < deadline, "command never applied");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stats = rig.manager.snapshot("rtu-01").unwrap().stats.unwrap();
    assert!(stats.commands_applied >= 1);

    // Input slot and unknown slot are refused
    assert!(rig.manager.command("rtu-01", 1, 1.0).is_err());
    assert!(rig.manager.command("rtu-01", 7, 1.0).is_err());
    rig.manager.shutdown_all().await;
}

#[tokio::test]
async fn test_missing_slot_reads_bad_quality() {
    let rig = TestRig::new(&[device("rtu-01", 10)], controller());
    let rtu = rig.rtu("rtu-01");
    rtu.set_input(1, 5.0, Quality::Good);
    rtu.set_missing(2, true);
    rig.manager.connect("rtu-01").await.unwrap();

    let readings = rig.manager.latest_readings("rtu-01").unwrap();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].quality, Quality::Good);
    assert_eq!(readings[1].quality, Quality::Bad);
    rig.manager.shutdown_all().await;
}

#[tokio::test]
async fn test_discover_finds_all_and_filters() {
    let rig = TestRig::new(&[device("rtu-01", 10), device("rtu-02", 11)], controller());

    let all = rig
        .manager
        .discover(Duration::from_millis(30), None)
        .await
        .unwrap();
    let mut names: Vec<_> = all.iter().map(|d| d.station_name.clone()).collect();
    names.sort();
    assert_eq!(names, ["rtu-01", "rtu-02"]);

    let one = rig
        .manager
        .discover(Duration::from_millis(30), Some("rtu-02"))
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].mac, rig.rtu("rtu-02").mac());
}
