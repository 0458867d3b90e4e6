//! UAS-WAND host command-line entry point.
//!
//! Thin CLI over the library: each subcommand builds the transport it
//! needs, runs one operation, and prints the result. Ctrl-C cancels the
//! operation in flight via the shared [`CancelToken`].

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use uaswand_core::WifiSettings;
use uaswand_host::config;
use uaswand_host::transport::http::HttpTransport;
use uaswand_host::transport::serial::SerialTransport;
use uaswand_host::transport::tcp::FramedTcpTransport;
use uaswand_host::{CancelToken, ConnectionManager, DiscoveryEngine, WandTransport};

#[derive(Parser)]
#[command(name = "uaswand", about = "UAS-WAND device discovery and control", version)]
struct Cli {
    /// Transport used for device commands.
    #[arg(long, value_enum, default_value_t = TransportKind::Tcp)]
    transport: TransportKind,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportKind {
    /// Length-prefixed TCP socket.
    Tcp,
    /// HTTP(S) REST interface.
    Http,
}

#[derive(Subcommand)]
enum Command {
    /// Sweep attached networks for devices.
    Scan,
    /// Connect to a device and print its identity and link health.
    Connect { host: String, port: u16 },
    /// Print the device's WiFi configuration.
    Wifi { host: String, port: u16 },
    /// Update the device's WiFi configuration and restart the radio.
    SetWifi {
        host: String,
        port: u16,
        #[arg(long)]
        ssid: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value_t = true)]
        enable: bool,
    },
    /// Fetch the most recent completed measurement.
    Measure { host: String, port: u16 },
    /// Fetch a window of live readings.
    Live {
        host: String,
        port: u16,
        #[arg(long, default_value_t = 0)]
        start_index: u32,
        #[arg(long, default_value_t = 32)]
        num_points: u32,
    },
    /// List USB serial ports, flagging UAS-WAND hardware.
    Ports,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging; level overridden by `RUST_LOG` or the config file.
    let cfg = config::load_config()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.logging.level.clone())),
        )
        .init();

    let cli = Cli::parse();

    // One token for the whole invocation, cancelled by Ctrl-C.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("cancellation requested");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Scan => {
            let (engine, mut events) = DiscoveryEngine::new(cfg.discovery.clone());

            let printer = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        uaswand_host::DiscoveryEvent::DeviceFound(d) => {
                            println!("found {} at {}:{} ({:?})", d.device_id, d.host, d.port, d.kind);
                        }
                        uaswand_host::DiscoveryEvent::Progress(p) => {
                            info!(
                                "{} ({}% / {} hosts)",
                                p.current_step, p.percent_complete, p.hosts_scanned
                            );
                        }
                        _ => {}
                    }
                }
            });

            {
                let engine = Arc::clone(&engine);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    engine.stop_scan();
                });
            }

            let found = engine.scan_network().await;
            println!("scan complete: {found} device(s) found");
            printer.abort();
        }

        Command::Connect { host, port } => {
            let (manager, _events) = manager_for(cli.transport, &cfg)?;
            if !manager.connect(&host, port, &cancel).await {
                anyhow::bail!(
                    "connect failed: {}",
                    manager.last_error().unwrap_or_default()
                );
            }
            let device = manager
                .current_device()
                .ok_or_else(|| anyhow::anyhow!("no device descriptor after connect"))?;
            println!("connected: {} ({})", device.name, device.device_id);
            if let Some(firmware) = &device.firmware_version {
                println!("firmware:  {firmware}");
            }

            let health = manager.health_check(&cancel).await;
            println!(
                "health:    {}",
                if health.is_healthy { "ok" } else { "degraded" }
            );
            if let Some(rtt) = health.last_response_time {
                println!("round trip: {}ms", rtt.as_millis());
            }
            for issue in &health.issues {
                warn!("health issue: {issue}");
            }
            manager.disconnect().await;
        }

        Command::Wifi { host, port } => {
            let (manager, _events) = manager_for(cli.transport, &cfg)?;
            connect_or_bail(&manager, &host, port, &cancel).await?;
            let env = manager.api().wifi_settings(&cancel).await;
            match env.data {
                Some(wifi) if env.success => {
                    println!("ssid:    {}", wifi.ssid.as_deref().unwrap_or("(unset)"));
                    println!("enabled: {}", wifi.enabled);
                    println!("channel: {}", wifi.channel);
                    if let Some(ip) = &wifi.ip_address {
                        println!("address: {ip}");
                    }
                }
                _ => anyhow::bail!("wifi query failed: {} ({})", env.message, env.error_code),
            }
            manager.disconnect().await;
        }

        Command::SetWifi {
            host,
            port,
            ssid,
            password,
            enable,
        } => {
            let (manager, _events) = manager_for(cli.transport, &cfg)?;
            connect_or_bail(&manager, &host, port, &cancel).await?;

            let settings = WifiSettings {
                ssid: Some(ssid),
                password: Some(password),
                enable,
            };
            let env = manager.api().set_wifi_settings(&settings, &cancel).await;
            if !env.success {
                anyhow::bail!("wifi update failed: {} ({})", env.message, env.error_code);
            }
            println!("wifi settings accepted, restarting radio");

            let env = manager.api().restart_wifi(&cancel).await;
            if !env.success {
                anyhow::bail!("wifi restart failed: {} ({})", env.message, env.error_code);
            }
            println!("wifi restarted");
            manager.disconnect().await;
        }

        Command::Measure { host, port } => {
            let (manager, _events) = manager_for(cli.transport, &cfg)?;
            connect_or_bail(&manager, &host, port, &cancel).await?;
            let env = manager.api().measurement(&cancel).await;
            match env.data {
                Some(m) if env.success => {
                    println!("{} {} ({})", m.value, m.unit, m.timestamp);
                }
                _ => anyhow::bail!("measurement failed: {} ({})", env.message, env.error_code),
            }
            manager.disconnect().await;
        }

        Command::Live {
            host,
            port,
            start_index,
            num_points,
        } => {
            let (manager, _events) = manager_for(cli.transport, &cfg)?;
            connect_or_bail(&manager, &host, port, &cancel).await?;
            let env = manager
                .api()
                .live_reading(start_index, num_points, &cancel)
                .await;
            match env.data {
                Some(window) if env.success => {
                    println!(
                        "{} reading(s) from index {} ({} total on device)",
                        window.readings.len(),
                        window.start_index,
                        window.total_samples
                    );
                    for reading in &window.readings {
                        println!("  sensor {}: {:.3}", reading.sensor_id, reading.value);
                    }
                }
                _ => anyhow::bail!("live read failed: {} ({})", env.message, env.error_code),
            }
            manager.disconnect().await;
        }

        Command::Ports => {
            let serial = SerialTransport::new(&cfg.serial);
            let ports = serial.scan_ports().await?;
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in ports {
                println!(
                    "{}  {}  wand={}  available={}",
                    port.port_name, port.description, port.is_wand_device, port.is_available
                );
            }
        }
    }

    Ok(())
}

/// Builds a connection manager over the selected transport.
fn manager_for(
    kind: TransportKind,
    cfg: &uaswand_host::HostConfig,
) -> anyhow::Result<(
    ConnectionManager,
    tokio::sync::mpsc::Receiver<uaswand_host::ConnectionEvent>,
)> {
    let transport: Arc<dyn WandTransport> = match kind {
        TransportKind::Tcp => Arc::new(FramedTcpTransport::new(&cfg.connection)),
        TransportKind::Http => Arc::new(HttpTransport::new(&cfg.connection)?),
    };
    Ok(ConnectionManager::new(transport, &cfg.connection))
}

async fn connect_or_bail(
    manager: &ConnectionManager,
    host: &str,
    port: u16,
    cancel: &CancelToken,
) -> anyhow::Result<()> {
    if !manager.connect(host, port, cancel).await {
        anyhow::bail!(
            "connect failed: {}",
            manager.last_error().unwrap_or_default()
        );
    }
    Ok(())
}
