//! PROFINET IO Controller Service (pnsrv)

use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use errors::VoltageResult;
use pnsrv::core::bootstrap::{self, Args, ServiceArgs};
use pnsrv::core::devices::{DeviceEvent, DeviceManager};
use pnsrv::runtime::{serve_until_shutdown, start_supervisor};

#[tokio::main]
async fn main() -> VoltageResult<()> {
    // Parse arguments and initialize
    let args = Args::parse();
    let service_args: ServiceArgs = args.clone().into();
    let service_info = bootstrap::service_info();

    let config = bootstrap::load_configuration(&service_args, args.interface.as_deref())?;

    // One-shot modes log to the console only
    if args.validate || args.discover.is_some() {
        bootstrap::initialize_console_logging(&service_args, &service_info)?;
    } else {
        bootstrap::initialize_logging(&service_args, &service_info, &config)?;
    }
    if !args.no_color {
        common::service_bootstrap::print_startup_banner(&service_info);
    }
    bootstrap::check_system_requirements()?;

    // Validation mode: validate and exit
    if args.validate {
        bootstrap::validate_configuration(&config);
        return Ok(());
    }

    let factory = bootstrap::create_transport_factory(&config, args.simulate)?;
    let manager = DeviceManager::new(factory, config.controller.clone());

    // Discovery mode: identify, print JSON to stdout and exit
    if let Some(secs) = args.discover {
        let devices = manager.discover(Duration::from_secs(secs), None).await?;
        for d in &devices {
            info!(
                "{} {} vendor={:04X} device={:04X}",
                d.station_name,
                d.mac_string(),
                d.vendor_id,
                d.device_id
            );
        }
        let json = serde_json::to_string_pretty(&devices)?;
        println!("{json}");
        return Ok(());
    }

    for device in &config.devices {
        manager.add(device.clone())?;
    }
    info!("{} device(s) registered", config.devices.len());

    // State changes at info, readings stay at trace
    let mut events = manager.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(DeviceEvent::StateChanged(record)) => {
                    if let Some(class) = &record.classification {
                        warn!("{}: ERROR ({})", record.station, class.describe());
                    }
                },
                Ok(DeviceEvent::Reading { station, reading }) => {
                    tracing::trace!(
                        "{}: slot {} = {} ({:?})",
                        station,
                        reading.slot,
                        reading.value,
                        reading.quality
                    );
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event logger lagged, {} event(s) skipped", n);
                },
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (supervisor, supervisor_token) =
        start_supervisor(manager.clone(), &config.controller.reconnect);

    let reason = serve_until_shutdown(&manager, supervisor, supervisor_token).await;
    event_logger.abort();

    info!("pnsrv stopped ({:?})", reason);
    Ok(())
}
