//! Connection setup scenarios against simulated RTUs

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::time::Duration;

use common::{controller, device, TestRig};
use pnsrv::core::config::ControllerConfig;
use pnsrv::core::devices::{ConnectionState, Trigger};
use pnsrv::core::transport::mock::STATUS_TIMING_REJECTED;
use pnsrv::protocols::profinet::resilience::StrategyKind;
use pnsrv::protocols::profinet::rpc::PnioStatus;
use pnsrv::PnioError;

fn slow_steps() -> ControllerConfig {
    ControllerConfig {
        step_timeout_ms: 5_000,
        discovery_timeout_ms: 5_000,
        ..controller()
    }
}

#[tokio::test]
async fn test_second_connect_is_busy() {
    let rig = TestRig::new(&[device("rtu-01", 10), device("rtu-02", 11)], slow_steps());
    rig.rtu("rtu-01").hold_connect(true);

    let manager = rig.manager.clone();
    let pending = tokio::spawn(async move { manager.connect("rtu-01").await });
    rig.wait_for_state("rtu-01", ConnectionState::Connecting, Duration::from_secs(1))
        .await;

    let err = rig.manager.connect("rtu-02").await.unwrap_err();
    assert!(matches!(err, PnioError::Busy(ref holder) if holder == "rtu-01"));
    assert_eq!(err.to_string(), "busy: rtu-01");
    assert_eq!(rig.manager.state("rtu-02").unwrap(), ConnectionState::Offline);
    assert_eq!(rig.rtu("rtu-02").connect_requests(), 0);

    rig.manager.abort("rtu-01").await.unwrap();
    assert!(matches!(pending.await.unwrap(), Err(PnioError::Aborted(_))));
    assert_eq!(rig.manager.connecting(), None);

    // The slot is free again
    rig.manager.connect("rtu-02").await.unwrap();
    assert_eq!(rig.manager.state("rtu-02").unwrap(), ConnectionState::Running);
    rig.manager.shutdown_all().await;
}

#[tokio::test]
async fn test_format_rejection_falls_back_to_vendor_strategy() {
    let rig = TestRig::new(&[device("rtu-01", 10)], controller());
    let rtu = rig.rtu("rtu-01");
    rtu.require_vendor_format(true);

    rig.manager.connect("rtu-01").await.unwrap();

    let snap = rig.manager.snapshot("rtu-01").unwrap();
    assert_eq!(snap.state, ConnectionState::Running);
    assert_eq!(
        snap.session.unwrap().strategy,
        StrategyKind::VendorCompatible
    );
    assert_eq!(rtu.connect_requests(), 2);
    assert!(rtu.application_ready_confirmed());
    rig.manager.shutdown_all().await;
}

#[tokio::test]
async fn test_terminal_rejection_reports_classification() {
    let rig = TestRig::new(&[device("rtu-01", 10)], controller());
    // Expected submodule block rejected: no strategy can fix that
    rig.rtu("rtu-01")
        .reject_connects(Some(PnioStatus::new(0xDB, 0x81, 0x03, 0x01)));

    let err = rig.manager.connect("rtu-01").await.unwrap_err();
    let PnioError::ConnectFailed { classification, .. } = err else {
        panic!("expected ConnectFailed, got {err:?}");
    };
    assert_eq!(
        classification.status,
        Some(PnioStatus::new(0xDB, 0x81, 0x03, 0x01))
    );

    let snap = rig.manager.snapshot("rtu-01").unwrap();
    assert_eq!(snap.state, ConnectionState::Error);
    assert_eq!(
        snap.last_transition.unwrap().trigger,
        Trigger::ConnectionFailed
    );
    assert_eq!(rig.network.live_transports(), 0);
}

#[tokio::test]
async fn test_timing_rejection_ends_in_error_without_leak() {
    let rig = TestRig::new(&[device("rtu-01", 10)], controller());
    rig.rtu("rtu-01").reject_connects(Some(STATUS_TIMING_REJECTED));

    assert!(rig.manager.connect("rtu-01").await.is_err());
    assert_eq!(rig.manager.state("rtu-01").unwrap(), ConnectionState::Error);
    assert!(!rig.rtu("rtu-01").has_ar());
    assert_eq!(rig.network.live_transports(), 0);
}

#[tokio::test]
async fn test_abort_while_connecting() {
    let rig = TestRig::new(&[device("rtu-01", 10)], slow_steps());
    rig.rtu("rtu-01").hold_connect(true);

    let manager = rig.manager.clone();
    let pending = tokio::spawn(async move { manager.connect("rtu-01").await });
    rig.wait_for_state("rtu-01", ConnectionState::Connecting, Duration::from_secs(1))
        .await;

    rig.manager.abort("rtu-01").await.unwrap();
    // Transport closed before abort returned
    assert_eq!(rig.manager.state("rtu-01").unwrap(), ConnectionState::Offline);
    assert_eq!(rig.network.live_transports(), 0);
    assert!(matches!(pending.await.unwrap(), Err(PnioError::Aborted(_))));

    let snap = rig.manager.snapshot("rtu-01").unwrap();
    assert_eq!(snap.last_transition.unwrap().trigger, Trigger::Abort);
}

#[tokio::test]
async fn test_abort_while_in_discovery() {
    let rig = TestRig::new(&[device("rtu-01", 10)], slow_steps());
    rig.rtu("rtu-01").drop_input_frames(u32::MAX);

    let manager = rig.manager.clone();
    let pending = tokio::spawn(async move { manager.connect("rtu-01").await });
    rig.wait_for_state("rtu-01", ConnectionState::Discovery, Duration::from_secs(1))
        .await;
    // The CONNECTING slot is already free in DISCOVERY
    assert_eq!(rig.manager.connecting(), None);

    rig.manager.abort("rtu-01").await.unwrap();
    assert_eq!(rig.manager.state("rtu-01").unwrap(), ConnectionState::Offline);
    assert_eq!(rig.network.live_transports(), 0);
    assert!(matches!(pending.await.unwrap(), Err(PnioError::Aborted(_))));
    assert!(rig.manager.latest_readings("rtu-01").unwrap().is_empty());
}

#[tokio::test]
async fn test_abort_rejected_while_running() {
    let rig = TestRig::new(&[device("rtu-01", 10)], controller());
    rig.manager.connect("rtu-01").await.unwrap();

    assert!(matches!(
        rig.manager.abort("rtu-01").await,
        Err(PnioError::InvalidState { .. })
    ));
    assert_eq!(rig.manager.state("rtu-01").unwrap(), ConnectionState::Running);
    rig.manager.shutdown_all().await;
    assert_eq!(rig.manager.state("rtu-01").unwrap(), ConnectionState::Offline);
    assert_eq!(rig.network.live_transports(), 0);
}

/// Stop `rtu-01` and record what a caller sees the moment the call returns
async fn stop_and_observe(
    rig: &TestRig,
    trigger: Trigger,
) -> (Result<(), PnioError>, ConnectionState, usize) {
    let result = match trigger {
        Trigger::Abort => rig.manager.abort("rtu-01").await,
        _ => rig.manager.disconnect("rtu-01").await,
    };
    (
        result,
        rig.manager.state("rtu-01").unwrap(),
        rig.network.live_transports(),
    )
}

#[tokio::test]
async fn test_concurrent_aborts_wait_for_the_session() {
    let rig = TestRig::new(&[device("rtu-01", 10)], slow_steps());
    rig.rtu("rtu-01").hold_connect(true);

    let manager = rig.manager.clone();
    let pending = tokio::spawn(async move { manager.connect("rtu-01").await });
    rig.wait_for_state("rtu-01", ConnectionState::Connecting, Duration::from_secs(1))
        .await;

    let (first, second) = tokio::join!(
        stop_and_observe(&rig, Trigger::Abort),
        stop_and_observe(&rig, Trigger::Abort)
    );

    for (result, state, live) in [first, second] {
        result.unwrap();
        assert_eq!(state, ConnectionState::Offline);
        assert_eq!(live, 0);
    }
    assert!(matches!(pending.await.unwrap(), Err(PnioError::Aborted(_))));
    assert_eq!(rig.network.opened_transports(), 1);
}

#[tokio::test]
async fn test_concurrent_disconnects_release_once() {
    let rig = TestRig::new(&[device("rtu-01", 10)], controller());
    rig.manager.connect("rtu-01").await.unwrap();

    let (first, second) = tokio::join!(
        stop_and_observe(&rig, Trigger::Disconnect),
        stop_and_observe(&rig, Trigger::Disconnect)
    );

    for (result, state, live) in [first, second] {
        result.unwrap();
        assert_eq!(state, ConnectionState::Offline);
        assert_eq!(live, 0);
    }
    assert!(rig.rtu("rtu-01").releases() <= 1);
}

#[tokio::test]
async fn test_connect_refused_while_stopping() {
    let rig = TestRig::new(&[device("rtu-01", 10)], controller());
    rig.manager.connect("rtu-01").await.unwrap();

    let mut stopping = Box::pin(rig.manager.disconnect("rtu-01"));
    // First poll cancels the session; the task has not run yet
    assert!(futures::poll!(&mut stopping).is_pending());

    let err = rig.manager.connect("rtu-01").await.unwrap_err();
    assert!(matches!(
        err,
        PnioError::InvalidState {
            operation: "connect",
            ..
        }
    ));

    stopping.await.unwrap();
    assert_eq!(rig.manager.state("rtu-01").unwrap(), ConnectionState::Offline);
    assert_eq!(rig.network.live_transports(), 0);

    // Stopped for good: a fresh session is allowed again
    rig.manager.connect("rtu-01").await.unwrap();
    assert_eq!(rig.network.opened_transports(), 2);
    rig.manager.shutdown_all().await;
}
