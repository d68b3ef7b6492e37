use autodash::devices::sensor::Quantity;
use autodash::devices::storage::StorageEvent;
use autodash::devices::wireless::{DeviceType, WirelessDevice, WirelessEvent};
use autodash::devices::Simulator;
use autodash::events::collector;
use autodash::{DeviceHub, HubStatus, SystemClock};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::Level;

const DEFAULT_DATA_DIR: &str = "config";
const DEFAULT_USB_NAME: &str = "USB_DRIVE_01";

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> CliResult {
    let matches = App::new("autodash")
        .version("0.1.0")
        .author("AutoDash Systems Team")
        .about("🚗 AutoDash device simulator - mock sensor bus, USB storage and Bluetooth")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("data-dir")
                .short("d")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory holding registries, calibration and config")
                .takes_value(true)
                .default_value(DEFAULT_DATA_DIR)
                .global(true),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for reproducible random data")
                .takes_value(true)
                .global(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Seed must be an unsigned integer".into()),
                }),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log simulator activity to stderr")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("sensor")
                .about("🌡️  Environmental sensor on the I2C bus")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("read")
                        .about("Sample the sensor")
                        .arg(
                            Arg::with_name("samples")
                                .short("n")
                                .long("samples")
                                .value_name("COUNT")
                                .help("Number of update intervals to run")
                                .takes_value(true)
                                .default_value("1"),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("calibrate")
                        .about("Set and persist a calibration offset")
                        .arg(
                            Arg::with_name("quantity")
                                .help("temperature, humidity, pressure or light")
                                .required(true),
                        )
                        .arg(
                            Arg::with_name("offset")
                                .help("Offset added to every sample")
                                .required(true)
                                .allow_hyphen_values(true),
                        ),
                )
                .subcommand(SubCommand::with_name("registers").about("Dump the emulated sensor registers")),
        )
        .subcommand(
            SubCommand::with_name("usb")
                .about("💾 Removable storage and media index")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("insert")
                        .about("Plug in a simulated USB stick")
                        .arg(Arg::with_name("name").help("Device name").default_value(DEFAULT_USB_NAME)),
                )
                .subcommand(
                    SubCommand::with_name("remove")
                        .about("Unplug a USB stick")
                        .arg(Arg::with_name("id").help("Device id").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("scan")
                        .about("Index media files on a USB stick")
                        .arg(Arg::with_name("id").help("Device id").required(true)),
                )
                .subcommand(SubCommand::with_name("list").about("List known USB devices")),
        )
        .subcommand(
            SubCommand::with_name("bt")
                .about("📶 Bluetooth devices")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("discover")
                        .about("Run discovery and list devices in range")
                        .arg(
                            Arg::with_name("seconds")
                                .short("s")
                                .long("seconds")
                                .value_name("SECONDS")
                                .help("How long to search (defaults to the discovery timeout)")
                                .takes_value(true),
                        ),
                )
                .subcommand(SubCommand::with_name("list").about("List paired devices"))
                .subcommand(
                    SubCommand::with_name("pair")
                        .about("Pair a device, bringing it into range if needed")
                        .arg(Arg::with_name("device").help("Device id or name").required(true))
                        .arg(
                            Arg::with_name("type")
                                .short("t")
                                .long("type")
                                .value_name("TYPE")
                                .help("Device type when the device has to be brought into range")
                                .takes_value(true)
                                .possible_values(&[
                                    "phone",
                                    "headset",
                                    "speaker",
                                    "car-audio",
                                    "smartwatch",
                                    "tablet",
                                    "laptop",
                                ])
                                .default_value("phone"),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("connect")
                        .about("Connect a paired device")
                        .arg(Arg::with_name("device").help("Device id or name").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("disconnect")
                        .about("Disconnect a connected device")
                        .arg(Arg::with_name("device").help("Device id or name").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("unpair")
                        .about("Forget a paired device")
                        .arg(Arg::with_name("device").help("Device id or name").required(true)),
                ),
        )
        .subcommand(SubCommand::with_name("status").about("📊 Summary across all simulators"))
        .get_matches();

    let level = if matches.is_present("verbose") { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = matches.value_of("data-dir").unwrap_or(DEFAULT_DATA_DIR);
    let seed = matches.value_of("seed").map(str::parse::<u64>).transpose()?;
    let format = matches.value_of("format").unwrap_or("table");

    let mut hub = DeviceHub::open(data_dir, seed, Arc::new(SystemClock));
    hub.start()?;

    let outcome = match matches.subcommand() {
        ("sensor", Some(sub)) => handle_sensor(&mut hub, sub, format),
        ("usb", Some(sub)) => handle_usb(&mut hub, sub, format),
        ("bt", Some(sub)) => handle_bluetooth(&mut hub, sub, format),
        ("status", _) => {
            print_status(&hub.status(), format)?;
            Ok(())
        }
        _ => Ok(()),
    };

    // Persist whatever happened, even when the operation itself failed.
    hub.shutdown()?;
    outcome
}

fn handle_sensor(hub: &mut DeviceHub, matches: &ArgMatches<'_>, format: &str) -> CliResult {
    let interval = hub.sensor().update_interval_ms();
    match matches.subcommand() {
        ("read", Some(sub)) => {
            let samples: u64 = sub.value_of("samples").unwrap_or("1").parse()?;
            let mut readings = Vec::new();
            for _ in 0..samples.max(1) {
                hub.advance(interval);
                readings.push(hub.sensor().current_reading());
            }
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&readings)?);
            } else {
                for reading in &readings {
                    if !reading.is_valid {
                        println!("{} {}", "❌".red(), "Invalid reading".bright_red());
                        continue;
                    }
                    println!(
                        "{} {:>6.1} {}  {:>5.1} {}  {:>7.1} {}  {:>6.0} {}",
                        "🌡️ ".bright_blue(),
                        reading.temperature,
                        Quantity::Temperature.unit(),
                        reading.humidity,
                        Quantity::Humidity.unit(),
                        reading.pressure,
                        Quantity::Pressure.unit(),
                        reading.light_level,
                        Quantity::Light.unit(),
                    );
                }
            }
        }
        ("calibrate", Some(sub)) => {
            let quantity: Quantity = sub.value_of("quantity").unwrap_or_default().parse()?;
            let offset: f64 = sub.value_of("offset").unwrap_or_default().parse()?;
            hub.sensor_mut().calibrate(quantity, offset)?;
            print_result(
                "Calibration",
                &format!("{quantity} offset {offset:+} {}", quantity.unit()),
                hub.sensor().calibration(),
                format,
            )?;
        }
        ("registers", _) => {
            hub.advance(interval);
            let snapshot = hub.sensor().register_snapshot()?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{} {:#04x}", "Sensor registers @".bright_blue().bold(), snapshot.address);
                for (register, value) in snapshot.registers.iter().enumerate() {
                    println!("  {:#04x}: {:#04x}", register, value);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn handle_usb(hub: &mut DeviceHub, matches: &ArgMatches<'_>, format: &str) -> CliResult {
    let events = Arc::new(Mutex::new(Vec::<StorageEvent>::new()));
    hub.storage_mut().subscribe(collector(Arc::clone(&events)));

    match matches.subcommand() {
        ("insert", Some(sub)) => {
            let name = sub.value_of("name").unwrap_or(DEFAULT_USB_NAME);
            let id = hub.storage_mut().insert(name)?;
            if let Some(device) = hub.storage().device(&id) {
                print_result("USB Insert", &format!("{id} at {}", device.mount_point.display()), device, format)?;
            }
        }
        ("remove", Some(sub)) => {
            let id = sub.value_of("id").unwrap_or_default();
            let device = hub.storage_mut().remove(id)?;
            print_result("USB Remove", id, &device, format)?;
        }
        ("scan", Some(sub)) => {
            let id = sub.value_of("id").unwrap_or_default();
            let scanned = hub.storage_mut().scan(id);
            for event in events.lock().map(|e| e.clone()).unwrap_or_default() {
                if let StorageEvent::FileSystemError { error, .. } = event {
                    println!("{} {}", "⚠️ ".yellow(), error.yellow());
                }
            }
            let count = scanned?;
            let files = hub.storage().media_files(id).unwrap_or_default();
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(files)?);
            } else {
                println!("{} {} media files on {}", "🎵".bright_blue(), count, id.bright_cyan());
                for file in files {
                    println!(
                        "  {:<32} {:<20} {:>6}  {}",
                        file.title.bright_white(),
                        file.artist,
                        file.duration,
                        file.file_type.dimmed()
                    );
                }
            }
        }
        ("list", _) => {
            let devices = hub.storage().devices();
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(devices)?);
            } else if devices.is_empty() {
                println!("{}", "No USB devices".dimmed());
            } else {
                for device in devices {
                    let state = if device.is_connected { "connected".green() } else { "disconnected".red() };
                    println!(
                        "{:<10} {:<16} {:<12} {:>3} files  {:.1} GB free  {}",
                        device.device_id.bright_cyan(),
                        device.device_name,
                        state,
                        device.media_files.len(),
                        device.free_space as f64 / 1e9,
                        device.mount_point.display()
                    );
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn resolve_device(hub: &DeviceHub, id_or_name: &str) -> String {
    hub.wireless()
        .find(id_or_name)
        .map_or_else(|| id_or_name.to_string(), |d| d.device_id.clone())
}

fn handle_bluetooth(hub: &mut DeviceHub, matches: &ArgMatches<'_>, format: &str) -> CliResult {
    let events = Arc::new(Mutex::new(Vec::<WirelessEvent>::new()));
    hub.wireless_mut().subscribe(collector(Arc::clone(&events)));
    let timeouts = hub.wireless().config().clone();

    match matches.subcommand() {
        ("discover", Some(sub)) => {
            let seconds = match sub.value_of("seconds") {
                Some(s) => s.parse::<u64>()?,
                None => u64::from(timeouts.discovery_timeout_s),
            };
            hub.wireless_mut().start_discovery()?;
            hub.advance(seconds * 1000);
            hub.wireless_mut().stop_discovery();

            let found = hub.wireless().available_devices();
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(found)?);
            } else if found.is_empty() {
                println!("{}", "No devices in range".dimmed());
            } else {
                print_wireless_table(found);
            }
        }
        ("list", _) => {
            let paired = hub.wireless().paired_devices();
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(paired)?);
            } else if paired.is_empty() {
                println!("{}", "No paired devices".dimmed());
            } else {
                print_wireless_table(paired);
            }
        }
        ("pair", Some(sub)) => {
            let wanted = sub.value_of("device").unwrap_or_default();
            let existing = hub.wireless().find(wanted).map(|d| d.device_id.clone());
            let id = match existing {
                Some(id) => id,
                None => {
                    let device_type: DeviceType = sub.value_of("type").unwrap_or("phone").parse()?;
                    hub.wireless_mut().simulate_device_appearance(wanted, device_type)
                }
            };
            hub.wireless_mut().pair(&id)?;
            hub.advance(timeouts.pairing_timeout_ms);
            report_device(hub, &id, "Pair", format)?;
        }
        ("connect", Some(sub)) => {
            let id = resolve_device(hub, sub.value_of("device").unwrap_or_default());
            hub.wireless_mut().connect(&id)?;
            hub.advance(timeouts.connection_timeout_ms);
            report_device(hub, &id, "Connect", format)?;
        }
        ("disconnect", Some(sub)) => {
            let id = resolve_device(hub, sub.value_of("device").unwrap_or_default());
            hub.wireless_mut().disconnect(&id)?;
            report_device(hub, &id, "Disconnect", format)?;
        }
        ("unpair", Some(sub)) => {
            let id = resolve_device(hub, sub.value_of("device").unwrap_or_default());
            hub.wireless_mut().unpair(&id)?;
            println!("{} {} {}", "✅".green(), "Unpaired".bright_white(), id.bright_cyan());
        }
        _ => {}
    }

    if format != "json" {
        for event in events.lock().map(|e| e.clone()).unwrap_or_default() {
            match event {
                WirelessEvent::PairingError { device_id, error } | WirelessEvent::ConnectionError { device_id, error } => {
                    println!("{} {}: {}", "⚠️ ".yellow(), device_id, error.yellow());
                }
                WirelessEvent::ConnectionStateChanged { device_id, state } => {
                    println!("  {} {} → {}", "•".dimmed(), device_id.dimmed(), state.to_string().dimmed());
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn report_device(hub: &DeviceHub, id: &str, action: &str, format: &str) -> CliResult {
    match hub.wireless().device(id) {
        Some(device) => print_result(
            action,
            &format!("{} ({})", device.device_name, device.connection_state),
            device,
            format,
        ),
        None => {
            println!("{} {} {}", "❌".red(), action.bright_red(), id);
            Ok(())
        }
    }
}

fn print_wireless_table(devices: &[WirelessDevice]) {
    for device in devices {
        println!(
            "{:<8} {:<22} {:<11} {}  {:>3}%  {}",
            device.device_id.bright_cyan(),
            device.device_name,
            device.device_type.to_string(),
            device.device_address,
            device.signal_strength,
            device.connection_state.to_string().bright_white()
        );
    }
}

fn print_result<T: Serialize>(action: &str, summary: &str, value: &T, format: &str) -> CliResult {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{} {} {}", "✅".green(), action.bright_white().bold(), summary);
    }
    Ok(())
}

fn print_status(status: &HubStatus, format: &str) -> CliResult {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }

    let yes_no = |flag: bool| if flag { "yes".green() } else { "no".red() };

    println!("{} {}", "📊".bright_blue(), "AutoDash Status".bright_blue().bold());
    println!("{} {}", "Sensor connected:".bright_white(), yes_no(status.sensor_connected));
    println!(
        "{} {} devices, {} media files (monitoring: {})",
        "USB:".bright_white(),
        status.storage_devices,
        status.media_files,
        yes_no(status.storage_monitoring)
    );
    println!(
        "{} {} paired, {} connected, {} in range (initialized: {})",
        "Bluetooth:".bright_white(),
        status.paired_devices,
        status.connected_devices,
        status.available_devices,
        yes_no(status.bluetooth_initialized)
    );
    if status.active_faults.is_empty() {
        println!("{} {}", "Faults:".bright_white(), "none".green());
    } else {
        let labels: Vec<&str> = status.active_faults.iter().map(|f| f.label()).collect();
        println!("{} {}", "Faults:".bright_white(), labels.join(", ").red());
    }
    Ok(())
}
