use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::oneshot;

use gatt_hrm_client::bluetooth::bluez::{self, BluezPeripheral};
use gatt_hrm_client::bluetooth::{ConnectionManager, NotificationReceiver, Peripheral, PeripheralEvent};
use gatt_hrm_client::config::ClientConfig;
use gatt_hrm_client::export::SampleBuffer;
use gatt_hrm_client::utils::local_offset;

type Manager = ConnectionManager<BluezPeripheral>;

/// Find the configured characteristic and make it the active one
async fn select_configured(
    manager: &mut Manager,
    config: &ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = manager.catalog()?;

    let services = catalog.discover_services().await?;
    let service = services
        .into_iter()
        .find(|s| s.uuid == config.service_uuid)
        .ok_or_else(|| format!("Service {} not found on device", config.service_uuid))?;

    let characteristic = catalog
        .discover_characteristics(&service)
        .await?
        .into_iter()
        .find(|c| c.uuid == config.characteristic_uuid)
        .ok_or_else(|| {
            format!(
                "Characteristic {} not found in service {}",
                config.characteristic_uuid, service.uuid
            )
        })?;

    manager.select_characteristic(characteristic).await?;
    Ok(())
}

/// Log notifications until the user stops the program or the link drops
///
/// A Ctrl+C listener that failed to install is not a shutdown request; the
/// loop then runs until the link drops.
async fn receive_loop<P: Peripheral + ?Sized>(
    manager: &mut ConnectionManager<P>,
    rx: &mut NotificationReceiver,
    samples: &SampleBuffer,
    shutdown: &mut oneshot::Receiver<()>,
) {
    let mut listening = true;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = event.unwrap_or(PeripheralEvent::Disconnected);
                match manager.handle_event(event, samples) {
                    Some(measurement) => info!("{}", measurement),
                    None => break,
                }
            }
            signal = &mut *shutdown, if listening => match signal {
                Ok(()) => {
                    info!("Program terminated by user. Exiting gracefully.");
                    break;
                }
                Err(_) => {
                    warn!("Ctrl+C listener stopped, running until the link drops");
                    listening = false;
                }
            },
        }
    }
}

async fn run(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting GATT client");

    // Handle Ctrl+C gracefully
    let (tx, mut shutdown) = oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let peripheral = Arc::new(bluez::connect(&config.device_address).await?);
    let (mut manager, mut rx) = Manager::new();
    manager.attach(peripheral).await?;

    let samples = SampleBuffer::new();
    let result = session(&mut manager, &mut rx, &samples, &config, &mut shutdown).await;

    if manager.is_connected() {
        if let Err(e) = manager.disconnect().await {
            error!("Failed to disconnect: {}", e);
        }
    }

    if let Err(e) = samples.export_to_file(&config.export_path) {
        error!(
            "Failed to save RR intervals to {}: {}",
            config.export_path.display(),
            e
        );
    }

    result
}

async fn session(
    manager: &mut Manager,
    rx: &mut NotificationReceiver,
    samples: &SampleBuffer,
    config: &ClientConfig,
    shutdown: &mut oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    select_configured(manager, config).await?;

    let capabilities = match manager.session() {
        Some(session) => session.capabilities(),
        None => return Err("No characteristic selected".into()),
    };

    if capabilities.read {
        let read = match manager.session() {
            Some(session) => session.read().await,
            None => return Err("No characteristic selected".into()),
        };
        match read {
            Ok(value) => info!("{}", manager.decode(&value)),
            Err(e) if e.is_connection_loss() => {
                manager.connection_lost();
                return Err(e.into());
            }
            Err(e) => warn!("Initial read failed: {}", e),
        }
    }

    if !capabilities.subscribe {
        warn!(
            "Characteristic {} supports neither notify nor indicate",
            config.characteristic_uuid
        );
        return Ok(());
    }

    let configuration = match manager.subscribe().await {
        Ok(configuration) => configuration,
        Err(e) => {
            if e.is_connection_loss() {
                manager.connection_lost();
            }
            return Err(e.into());
        }
    };
    info!("Subscribed with {:?}", configuration);

    receive_loop(manager, rx, samples, shutdown).await;

    if manager.is_connected() {
        if let Err(e) = manager.unsubscribe().await {
            warn!("Failed to unsubscribe: {}", e);
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Resolve the local offset while the process is still single-threaded
    info!("Local UTC offset: {}", local_offset());

    // Load configuration
    let config = match ClientConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(run(config)) {
        Ok(()) => info!("Program completed successfully"),
        Err(e) => error!("Fatal error: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn failed_ctrl_c_listener_does_not_stop_the_loop() {
        let (mut manager, mut rx) = ConnectionManager::<dyn Peripheral>::new();
        let samples = SampleBuffer::new();
        let (tx, mut shutdown) = oneshot::channel::<()>();
        drop(tx);

        let finished = timeout(
            Duration::from_millis(50),
            receive_loop(&mut manager, &mut rx, &samples, &mut shutdown),
        )
        .await;
        assert!(finished.is_err());
    }

    #[tokio::test]
    async fn ctrl_c_stops_the_loop() {
        let (mut manager, mut rx) = ConnectionManager::<dyn Peripheral>::new();
        let samples = SampleBuffer::new();
        let (tx, mut shutdown) = oneshot::channel();
        tx.send(()).unwrap();

        let finished = timeout(
            Duration::from_secs(1),
            receive_loop(&mut manager, &mut rx, &samples, &mut shutdown),
        )
        .await;
        assert!(finished.is_ok());
    }
}
