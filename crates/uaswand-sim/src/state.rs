//! Shared simulated device state.
//!
//! Both server fronts (framed TCP and HTTP) dispatch into the same
//! [`SimState`], so a scan started over the socket is visible over HTTP
//! and vice versa.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use uaswand_core::{
    ConnectionState, DeviceDescriptor, DeviceKind, LiveReading, Measurement, ScanStatus,
    SensorReading, WifiConfiguration, WifiSettings,
};

/// Identity the simulator reports over `/info`.
pub const SIM_DEVICE_ID: &str = "SIM-001";
pub const SIM_DEVICE_NAME: &str = "UAS-WAND_Simulator";
pub const SIM_FIRMWARE_VERSION: &str = "3.9.0-sim";
pub const SIM_SERIAL_NUMBER: &str = "SIM-SN-0001";

/// How long a simulated scan takes from start to completion.
const SCAN_DURATION: Duration = Duration::from_secs(10);

/// Points reported by a completed scan.
const SCAN_TOTAL_POINTS: u32 = 100;

/// Size of the circular pool live readings are windowed from.
const SAMPLE_POOL: u32 = 1024;

/// Largest `numPoints` honoured by one `/live` request.
const MAX_WINDOW: u32 = 256;

/// Simulated sample rate in Hz.
const SAMPLE_RATE: u32 = 100;

#[derive(Debug, Clone, Copy)]
struct ScanRun {
    started: Instant,
}

/// The whole simulated device.
pub struct SimState {
    /// Basic-auth credentials the HTTP front checks.
    pub username: String,
    pub password: String,
    /// Artificial per-request latency.
    pub latency: Duration,
    wifi: Mutex<WifiConfiguration>,
    scan: Mutex<Option<ScanRun>>,
    measurement_counter: AtomicU64,
}

impl Default for SimState {
    fn default() -> Self {
        Self::new()
    }
}

impl SimState {
    pub fn new() -> Self {
        Self {
            username: "test".to_string(),
            password: "0000".to_string(),
            latency: Duration::from_millis(20),
            wifi: Mutex::new(WifiConfiguration {
                ssid: Some("SimulatedNetwork".to_string()),
                password: Some("admin".to_string()),
                enabled: true,
                channel: 6,
                ip_address: Some("127.0.0.1".to_string()),
            }),
            scan: Mutex::new(None),
            measurement_counter: AtomicU64::new(0),
        }
    }

    /// State without artificial latency, for tests.
    pub fn instant() -> Self {
        Self {
            latency: Duration::ZERO,
            ..Self::new()
        }
    }

    /// The descriptor reported by `GET /info`.
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            device_id: SIM_DEVICE_ID.to_string(),
            name: SIM_DEVICE_NAME.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            firmware_version: Some(SIM_FIRMWARE_VERSION.to_string()),
            serial_number: Some(SIM_SERIAL_NUMBER.to_string()),
            kind: DeviceKind::Simulator,
            last_seen: Utc::now(),
            is_online: true,
            connection_state: ConnectionState::Connected,
        }
    }

    pub fn wifi(&self) -> WifiConfiguration {
        self.wifi.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Applies an update the way the firmware does: unset fields keep
    /// their current values, channel and address never change here.
    pub fn apply_wifi(&self, settings: &WifiSettings) -> WifiConfiguration {
        let mut wifi = self.wifi.lock().unwrap_or_else(|e| e.into_inner());
        wifi.apply(settings);
        wifi.clone()
    }

    /// Starts (or restarts) a scan.
    pub fn start_scan(&self) -> ScanStatus {
        *self.scan.lock().unwrap_or_else(|e| e.into_inner()) = Some(ScanRun {
            started: Instant::now(),
        });
        self.scan_status()
    }

    /// Stops a running scan, keeping the progress it had reached.
    pub fn stop_scan(&self) -> ScanStatus {
        let status = self.scan_status();
        *self.scan.lock().unwrap_or_else(|e| e.into_inner()) = None;
        ScanStatus {
            status: 0,
            message: Some("scan stopped".to_string()),
            ..status
        }
    }

    /// Progress is a pure function of elapsed time since the scan began.
    pub fn scan_status(&self) -> ScanStatus {
        let mut scan = self.scan.lock().unwrap_or_else(|e| e.into_inner());
        match *scan {
            None => ScanStatus {
                status: 0,
                message: Some("idle".to_string()),
                progress: 0,
                total_points: 0,
            },
            Some(run) => {
                let elapsed = run.started.elapsed();
                if elapsed >= SCAN_DURATION {
                    // Completion is observed lazily on the next status read.
                    *scan = None;
                    ScanStatus {
                        status: 0,
                        message: Some("scan complete".to_string()),
                        progress: 100,
                        total_points: SCAN_TOTAL_POINTS,
                    }
                } else {
                    let percent =
                        (elapsed.as_millis() * 100 / SCAN_DURATION.as_millis()).min(99) as u8;
                    ScanStatus {
                        status: 1,
                        message: Some("scanning".to_string()),
                        progress: percent,
                        total_points: SCAN_TOTAL_POINTS,
                    }
                }
            }
        }
    }

    /// A window of synthetic samples.
    ///
    /// Values are deterministic in the sample index so repeated reads of
    /// the same window agree; the window is clamped to the pool size.
    pub fn live_reading(&self, start_index: u32, num_points: u32) -> LiveReading {
        let start_index = start_index.min(SAMPLE_POOL);
        let count = num_points.min(MAX_WINDOW).min(SAMPLE_POOL - start_index);

        let readings = (start_index..start_index + count)
            .map(|i| {
                let phase = f64::from(i);
                let value = 8.0 + (phase * 0.37).sin() * 0.25;
                SensorReading {
                    sensor_id: 1,
                    value,
                    timestamp: Utc::now(),
                    thickness: Some(value),
                    amplitude: Some(0.5 + (phase * 0.11).sin() * 0.1),
                    quality: Some(90 + (i % 10) as u8),
                }
            })
            .collect();

        LiveReading {
            device_id: SIM_DEVICE_ID.to_string(),
            start_index,
            readings,
            total_samples: SAMPLE_POOL,
            sample_rate: SAMPLE_RATE,
        }
    }

    /// The most recent completed measurement.
    pub fn measurement(&self) -> Measurement {
        let n = self.measurement_counter.fetch_add(1, Ordering::Relaxed);
        let value = 8.05 + (n as f64 * 0.21).sin() * 0.15;
        Measurement {
            measurement_id: format!("SIM-M-{n:06}"),
            device_id: SIM_DEVICE_ID.to_string(),
            timestamp: Utc::now(),
            value,
            unit: "mm".to_string(),
            min_value: Some(7.9),
            max_value: Some(8.3),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_progress_advances_with_time() {
        // Arrange
        let state = SimState::instant();
        assert!(!state.scan_status().is_scanning());

        // Act
        let started = state.start_scan();

        // Assert: freshly started scans report low progress
        assert!(started.is_scanning());
        assert!(started.progress < 10);
    }

    #[test]
    fn test_stop_scan_returns_to_idle() {
        let state = SimState::instant();
        state.start_scan();
        let stopped = state.stop_scan();
        assert!(!stopped.is_scanning());
        assert!(!state.scan_status().is_scanning());
    }

    #[test]
    fn test_live_reading_window_is_clamped() {
        // Arrange
        let state = SimState::instant();

        // Act: ask for more than the pool holds
        let window = state.live_reading(1000, 500);

        // Assert
        assert_eq!(window.start_index, 1000);
        assert_eq!(window.readings.len(), 24);
        assert_eq!(window.total_samples, 1024);
    }

    #[test]
    fn test_live_reading_is_deterministic_per_index() {
        let state = SimState::instant();
        let a = state.live_reading(16, 8);
        let b = state.live_reading(16, 8);
        let values_a: Vec<f64> = a.readings.iter().map(|r| r.value).collect();
        let values_b: Vec<f64> = b.readings.iter().map(|r| r.value).collect();
        assert_eq!(values_a, values_b);
    }

    #[test]
    fn test_wifi_update_preserves_channel() {
        // Arrange
        let state = SimState::instant();

        // Act
        let updated = state.apply_wifi(&WifiSettings {
            ssid: Some("NewNetwork".to_string()),
            password: None,
            enable: true,
        });

        // Assert
        assert_eq!(updated.ssid.as_deref(), Some("NewNetwork"));
        assert_eq!(updated.channel, 6, "channel is not settable over /wifi");
        assert_eq!(updated.password.as_deref(), Some("admin"));
    }
}
