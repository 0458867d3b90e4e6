//! USB serial transport.
//!
//! UAS-WAND hardware enumerates as a USB CDC serial port and speaks a
//! line-oriented command protocol at 115200 baud, 8 data bits, no parity,
//! one stop bit. Commands are single lines (`ID`, `VERSION`, `RESET`,
//! `GET_CONFIG`, `CONFIG:<json>`) answered by single lines.
//!
//! The `serialport` crate is blocking, so every port operation runs inside
//! `tokio::task::spawn_blocking`. Cancellation abandons the await; the
//! blocking read itself still runs out its own port timeout in the
//! background before the port lock frees up.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use serialport::{SerialPort, SerialPortType};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uaswand_core::model::serial::WAND_BAUD_RATE;
use uaswand_core::{ConnectionState, DeviceSignature, SerialPortDescriptor};

use crate::cancel::CancelToken;
use crate::config::SerialConfig;
use crate::transport::{StateCell, TransportError};

type SharedPort = Arc<StdMutex<Option<Box<dyn SerialPort>>>>;

/// Line-oriented serial link to a UAS-WAND.
///
/// Shares the connect/disconnect/state surface of the envelope transports
/// but exchanges command lines rather than JSON envelopes.
pub struct SerialTransport {
    command_timeout: Duration,
    signature: DeviceSignature,
    port: SharedPort,
    connected: StdMutex<Option<SerialPortDescriptor>>,
    state: StateCell,
    last_error: StdMutex<Option<String>>,
}

impl SerialTransport {
    pub fn new(config: &SerialConfig) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            signature: config.signature.clone(),
            port: Arc::new(StdMutex::new(None)),
            connected: StdMutex::new(None),
            state: StateCell::new(),
            last_error: StdMutex::new(None),
        }
    }

    fn record_error(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    /// Enumerates serial ports, flagging recognized UAS-WAND hardware.
    ///
    /// Availability is tested by attempting an exclusive open; a port that
    /// another process holds reports `is_available == false`.
    pub async fn scan_ports(&self) -> Result<Vec<SerialPortDescriptor>, TransportError> {
        let signature = self.signature.clone();
        let held_port = self
            .connected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|d| d.port_name.clone());

        let descriptors = tokio::task::spawn_blocking(move || {
            let ports = serialport::available_ports()
                .map_err(|e| TransportError::Request(e.to_string()))?;

            let mut out = Vec::with_capacity(ports.len());
            for info in ports {
                let (vendor_id, product_id, manufacturer, serial_number, description) =
                    match &info.port_type {
                        SerialPortType::UsbPort(usb) => (
                            Some(format!("{:04X}", usb.vid)),
                            Some(format!("{:04X}", usb.pid)),
                            usb.manufacturer.clone(),
                            usb.serial_number.clone(),
                            usb.product
                                .clone()
                                .unwrap_or_else(|| "USB Serial Device".to_string()),
                        ),
                        SerialPortType::PciPort => {
                            (None, None, None, None, "PCI Serial Port".to_string())
                        }
                        SerialPortType::BluetoothPort => {
                            (None, None, None, None, "Bluetooth Serial Port".to_string())
                        }
                        SerialPortType::Unknown => {
                            (None, None, None, None, "Unknown Serial Port".to_string())
                        }
                    };

                let is_wand_device = signature.matches(
                    vendor_id.as_deref(),
                    product_id.as_deref(),
                    &description,
                    manufacturer.as_deref(),
                );

                // The port we currently hold open will fail the exclusive
                // open test, but it is available to us.
                let is_available = if held_port.as_deref() == Some(info.port_name.as_str()) {
                    true
                } else {
                    probe_exclusive_open(&info.port_name)
                };

                out.push(SerialPortDescriptor {
                    port_name: info.port_name,
                    description,
                    vendor_id,
                    product_id,
                    manufacturer,
                    serial_number,
                    is_wand_device,
                    is_available,
                    baud_rate: WAND_BAUD_RATE,
                    last_seen: Utc::now(),
                });
            }
            Ok::<_, TransportError>(out)
        })
        .await
        .map_err(|e| TransportError::Request(e.to_string()))??;

        Ok(descriptors)
    }

    /// Opens `port_name` at the fixed UAS-WAND line settings.
    ///
    /// Returns `false` on failure; see [`last_error`](Self::last_error).
    pub async fn connect(&self, port_name: &str, cancel: &CancelToken) -> bool {
        if self.is_connected() {
            self.disconnect().await;
        }

        self.state.set(ConnectionState::Connecting);
        debug!(port = port_name, "opening serial port");

        let name = port_name.to_string();
        let timeout = self.command_timeout;
        let open = crate::cancel::with_deadline(
            timeout,
            cancel,
            tokio::task::spawn_blocking(move || open_wand_port(&name, timeout)),
        )
        .await;

        let port = match open {
            Ok(Ok(Ok(port))) => port,
            Ok(Ok(Err(e))) => {
                self.record_error(format!("could not open {port_name}: {e}"));
                self.state.set(ConnectionState::Error);
                return false;
            }
            Ok(Err(join)) => {
                self.record_error(format!("serial open task failed: {join}"));
                self.state.set(ConnectionState::Error);
                return false;
            }
            Err(interrupted) => {
                let err: TransportError = interrupted.into();
                self.record_error(format!("could not open {port_name}: {err}"));
                let next = match err {
                    TransportError::Timeout => ConnectionState::Timeout,
                    _ => ConnectionState::Disconnected,
                };
                self.state.set(next);
                return false;
            }
        };

        *self.port.lock().unwrap_or_else(|e| e.into_inner()) = Some(port);
        *self.connected.lock().unwrap_or_else(|e| e.into_inner()) = Some(SerialPortDescriptor {
            port_name: port_name.to_string(),
            description: String::new(),
            vendor_id: None,
            product_id: None,
            manufacturer: None,
            serial_number: None,
            is_wand_device: false,
            is_available: true,
            baud_rate: WAND_BAUD_RATE,
            last_seen: Utc::now(),
        });
        self.state.set(ConnectionState::Connected);
        true
    }

    pub async fn disconnect(&self) {
        *self.port.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.connected.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.state.set(ConnectionState::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn connected_port(&self) -> Option<SerialPortDescriptor> {
        self.connected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Sends one command line and reads one response line.
    pub async fn send_command(
        &self,
        command: &str,
        cancel: &CancelToken,
    ) -> Result<String, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let port = Arc::clone(&self.port);
        let line = command.to_string();
        let outcome = crate::cancel::with_deadline(
            self.command_timeout,
            cancel,
            tokio::task::spawn_blocking(move || exchange_line(&port, &line)),
        )
        .await;

        let result = match outcome {
            Ok(Ok(inner)) => inner,
            Ok(Err(join)) => Err(TransportError::Request(format!(
                "serial exchange task failed: {join}"
            ))),
            Err(interrupted) => Err(interrupted.into()),
        };

        match result {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(command = %command, error = %err, "serial command failed");
                self.record_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Queries the device identifier (`ID` command).
    pub async fn device_id(&self, cancel: &CancelToken) -> Result<String, TransportError> {
        self.send_command("ID", cancel).await
    }

    /// Queries the firmware version (`VERSION` command).
    pub async fn firmware_version(&self, cancel: &CancelToken) -> Result<String, TransportError> {
        self.send_command("VERSION", cancel).await
    }

    /// Requests a device reboot. The device drops the link, so the
    /// transport disconnects afterwards regardless of the reply.
    pub async fn reset(&self, cancel: &CancelToken) -> Result<String, TransportError> {
        let reply = self.send_command("RESET", cancel).await;
        self.disconnect().await;
        reply
    }

    /// Reads the device configuration blob (`GET_CONFIG` command).
    pub async fn read_configuration(
        &self,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, TransportError> {
        let line = self.send_command("GET_CONFIG", cancel).await?;
        serde_json::from_str(&line)
            .map_err(|e| TransportError::Request(format!("configuration was not valid JSON: {e}")))
    }

    /// Writes a configuration blob (`CONFIG:<json>` command).
    pub async fn write_configuration(
        &self,
        config: &serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<String, TransportError> {
        let command = format!("CONFIG:{config}");
        self.send_command(&command, cancel).await
    }

    /// True when the connected device answers `ID` with a recognizable
    /// UAS-WAND identifier.
    pub async fn verify_wand_device(&self, cancel: &CancelToken) -> bool {
        match self.device_id(cancel).await {
            Ok(id) => {
                let id_lower = id.to_ascii_lowercase();
                self.signature
                    .keywords
                    .iter()
                    .any(|kw| id_lower.contains(kw.as_str()))
            }
            Err(_) => false,
        }
    }
}

/// Attempts an exclusive open to test availability. Any failure means the
/// port is held elsewhere or gone.
fn probe_exclusive_open(port_name: &str) -> bool {
    serialport::new(port_name, WAND_BAUD_RATE)
        .timeout(Duration::from_millis(200))
        .open()
        .is_ok()
}

/// Opens a port at the fixed UAS-WAND line settings.
fn open_wand_port(
    port_name: &str,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, serialport::Error> {
    serialport::new(port_name, WAND_BAUD_RATE)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(timeout)
        .open()
}

/// Writes one command line and reads bytes until newline.
fn exchange_line(port: &SharedPort, command: &str) -> Result<String, TransportError> {
    let mut guard = port.lock().unwrap_or_else(|e| e.into_inner());
    let Some(port) = guard.as_mut() else {
        return Err(TransportError::NotConnected);
    };

    port.write_all(command.as_bytes())?;
    port.write_all(b"\n")?;
    port.flush()?;

    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match port.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                return Err(TransportError::Timeout);
            }
            Err(e) => return Err(TransportError::Io(e)),
        }
    }

    let text = String::from_utf8_lossy(&line);
    Ok(text.trim_end_matches('\r').trim().to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialConfig;

    #[tokio::test]
    async fn test_send_command_without_connection_is_not_connected() {
        // Arrange
        let transport = SerialTransport::new(&SerialConfig::default());
        let cancel = CancelToken::new();

        // Act
        let result = transport.send_command("ID", &cancel).await;

        // Assert
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_to_missing_port_fails_with_reason() {
        let transport = SerialTransport::new(&SerialConfig::default());
        let cancel = CancelToken::new();

        let connected = transport.connect("/dev/does-not-exist-9999", &cancel).await;

        assert!(!connected);
        assert!(transport.last_error().is_some());
        assert_eq!(transport.connection_state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_scan_ports_completes_without_hardware() {
        // Enumeration must succeed (possibly empty) on machines with no
        // serial hardware at all.
        let transport = SerialTransport::new(&SerialConfig::default());
        let ports = transport.scan_ports().await;
        assert!(ports.is_ok());
    }
}
