use autodash::devices::sensor::SensorEvent;
use autodash::devices::storage::StorageEvent;
use autodash::devices::wireless::WirelessEvent;
use autodash::devices::Simulator;
use autodash::{DeviceHub, SystemClock};
use clap::{App, Arg};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{error, info, warn};

const DEFAULT_DATA_DIR: &str = "config";
const DEFAULT_TICK_MS: &str = "250";
const EVENT_BROADCAST_BUFFER_SIZE: usize = 256;
const STATUS_EVERY_TICKS: u64 = 40;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("autodash-sim")
        .version("0.1.0")
        .about("Runs the AutoDash device simulators in real time")
        .arg(
            Arg::with_name("data-dir")
                .short("d")
                .long("data-dir")
                .value_name("DIR")
                .takes_value(true)
                .default_value(DEFAULT_DATA_DIR),
        )
        .arg(Arg::with_name("seed").long("seed").value_name("SEED").takes_value(true))
        .arg(
            Arg::with_name("tick")
                .long("tick-ms")
                .value_name("MS")
                .help("Real-time step between simulator advances")
                .takes_value(true)
                .default_value(DEFAULT_TICK_MS)
                .validator(validate_tick),
        )
        .arg(Arg::with_name("discover").long("discover").help("Start Bluetooth discovery on launch"))
        .get_matches();

    let data_dir = matches.value_of("data-dir").unwrap_or(DEFAULT_DATA_DIR);
    let seed = matches.value_of("seed").map(str::parse::<u64>).transpose()?;
    let tick_ms: u64 = matches.value_of("tick").unwrap_or(DEFAULT_TICK_MS).parse()?;

    println!("🚗 AutoDash Device Simulator");
    println!("============================");

    let (event_tx, mut event_rx) = broadcast::channel::<String>(EVENT_BROADCAST_BUFFER_SIZE);

    let mut hub = DeviceHub::open(data_dir, seed, Arc::new(SystemClock));
    forward_events(&mut hub, &event_tx);
    hub.start()?;
    if matches.is_present("discover") {
        hub.wireless_mut().start_discovery()?;
    }

    let logger = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(line) => info!("📡 {}", line),
                Err(broadcast::error::RecvError::Lagged(skipped)) => warn!("dropped {} events", skipped),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        let _ = stop_tx.send(());
    });

    let mut interval = time::interval(Duration::from_millis(tick_ms));
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                hub.advance(tick_ms);
                ticks += 1;
                if ticks % STATUS_EVERY_TICKS == 0 {
                    let status = hub.status();
                    info!(
                        uptime_ms = status.uptime_ms,
                        usb = status.storage_devices,
                        paired = status.paired_devices,
                        in_range = status.available_devices,
                        healthy = status.healthy,
                        "status"
                    );
                }
            }
            _ = &mut stop_rx => {
                info!("shutdown requested");
                break;
            }
        }
    }

    if let Err(e) = hub.shutdown() {
        error!("❌ Shutdown error: {}", e);
    }

    drop(event_tx);
    logger.abort();
    println!("🚗 AutoDash Device Simulator stopped");

    Ok(())
}

fn validate_tick(value: String) -> Result<(), String> {
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(()),
        _ => Err("Tick must be a positive number of milliseconds".into()),
    }
}

/// Forward every simulator notification into the broadcast channel as a log line.
fn forward_events(hub: &mut DeviceHub, tx: &broadcast::Sender<String>) {
    let sensor_tx = tx.clone();
    hub.sensor_mut().subscribe(move |event: &SensorEvent| {
        let line = match event {
            SensorEvent::ReadingUpdated(r) => format!(
                "sensor: {:.1}°C {:.1}% {:.1}hPa {:.0}lux",
                r.temperature, r.humidity, r.pressure, r.light_level
            ),
            other => format!("sensor: {other:?}"),
        };
        let _ = sensor_tx.send(line);
    });

    let storage_tx = tx.clone();
    hub.storage_mut().subscribe(move |event: &StorageEvent| {
        let line = match event {
            StorageEvent::DeviceConnected(d) => format!("usb: {} connected at {}", d.device_id, d.mount_point.display()),
            StorageEvent::MediaFilesChanged { device_id, files } => {
                format!("usb: {device_id} has {} media files", files.len())
            }
            other => format!("usb: {other:?}"),
        };
        let _ = storage_tx.send(line);
    });

    let wireless_tx = tx.clone();
    hub.wireless_mut().subscribe(move |event: &WirelessEvent| {
        let line = match event {
            WirelessEvent::DeviceDiscovered(d) => {
                format!("bt: discovered {} ({}) {}", d.device_name, d.device_type, d.device_address)
            }
            WirelessEvent::ConnectionStateChanged { device_id, state } => format!("bt: {device_id} is {state}"),
            // Signal jitter is too chatty for the log.
            WirelessEvent::SignalStrengthChanged { .. } => return,
            other => format!("bt: {other:?}"),
        };
        let _ = wireless_tx.send(line);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_must_be_positive() {
        assert!(validate_tick(DEFAULT_TICK_MS.to_string()).is_ok());
        assert!(validate_tick("0".to_string()).is_err());
        assert!(validate_tick("-5".to_string()).is_err());
        assert!(validate_tick("fast".to_string()).is_err());
    }
}
