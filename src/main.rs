use anyhow::Result;
use tokio::spawn;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use heartlink::btle::BtleplugAdapter;
use heartlink::{Command, ConnectionCoordinator, CoordinatorConfig, MonitorEvent};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (event_tx, event_rx) = mpsc::channel(128);
    let (command_tx, command_rx) = mpsc::channel(8);
    let (output_tx, mut output_rx) = mpsc::channel(128);

    let adapter = BtleplugAdapter::new(event_tx).await?;
    let coordinator = ConnectionCoordinator::new(
        adapter,
        event_rx,
        command_rx,
        output_tx,
        CoordinatorConfig::default(),
    );
    spawn(coordinator.run());

    command_tx.send(Command::Start).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = command_tx.send(Command::Stop).await;
                break;
            }
            event = output_rx.recv() => match event {
                Some(MonitorEvent::Reading(reading)) => {
                    info!(
                        bpm = reading.bpm,
                        energy = ?reading.energy_expended,
                        rr = ?reading.rr_intervals,
                        contact = ?reading.sensor_contact_detected,
                        "heart rate"
                    );
                }
                Some(MonitorEvent::SensorLocation(location)) => {
                    info!(?location, "sensor location");
                }
                Some(MonitorEvent::Status(status)) => info!(?status, "connection status"),
                Some(MonitorEvent::DecodeFailed(error)) => {
                    warn!(%error, "measurement decode problem");
                }
                None => break,
            },
        }
    }
    Ok(())
}
