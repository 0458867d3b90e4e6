//! Device identity, connection state, and connection health.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of endpoint a discovered entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// A physical UAS-WAND inspection wand.
    #[default]
    Wand,
    /// The locally running protocol simulator.
    Simulator,
    /// A responsive host that did not validate as a UAS-WAND.
    Generic,
}

/// Connection lifecycle of a transport.
///
/// Transitions are owned by the connection manager; transports report
/// `Connecting`/`Connected`/`Disconnecting`/`Disconnected` themselves and
/// the manager refines failures into `Error`/`Timeout`/`Unauthorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
    Timeout,
    Unauthorized,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Error => "error",
            ConnectionState::Timeout => "timeout",
            ConnectionState::Unauthorized => "unauthorized",
        };
        f.write_str(s)
    }
}

/// The in-memory record for one known device, real or simulated.
///
/// Created when a device is discovered or manually added; mutated by
/// discovery refreshes and connection transitions; removed only explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Opaque identity. Discovery uses `UAS_{host}_{port}` style ids for
    /// swept devices and a fixed id for the simulator.
    pub device_id: String,
    /// Human-readable display name.
    pub name: String,
    /// IP address or host name.
    pub host: String,
    /// TCP/HTTP port.
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub kind: DeviceKind,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
    #[serde(default)]
    pub connection_state: ConnectionState,
}

impl DeviceDescriptor {
    /// Builds a descriptor for a freshly seen endpoint with empty identity
    /// fields; discovery validation fills the rest in.
    pub fn unidentified(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            device_id: format!("UAS_{host}_{port}"),
            name: format!("UAS-WAND_{host}:{port}"),
            host,
            port,
            firmware_version: None,
            serial_number: None,
            kind: DeviceKind::Wand,
            last_seen: Utc::now(),
            is_online: false,
            connection_state: ConnectionState::Disconnected,
        }
    }

    /// The coalescing key for the discovered-device collection.
    pub fn endpoint_key(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    /// Marks the device as seen now, online or not.
    pub fn touch(&mut self, online: bool) {
        self.is_online = online;
        self.last_seen = Utc::now();
    }
}

/// Point-in-time connection quality snapshot.
///
/// Recomputed on every health check; never cached between calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionHealth {
    pub is_healthy: bool,
    pub connection_duration: Duration,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    /// Round-trip latency of the most recent keep-alive, if one completed.
    pub last_response_time: Option<Duration>,
    /// Human-readable warnings (loss rate, latency). Empty when healthy.
    pub issues: Vec<String>,
}

impl ConnectionHealth {
    /// Fraction of sent packets that were lost, in `0.0..=1.0`.
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unidentified_descriptor_derives_id_from_endpoint() {
        // Arrange / Act
        let dev = DeviceDescriptor::unidentified("192.168.1.50", 443);

        // Assert
        assert_eq!(dev.device_id, "UAS_192.168.1.50_443");
        assert_eq!(dev.endpoint_key(), ("192.168.1.50".to_string(), 443));
        assert!(!dev.is_online);
    }

    #[test]
    fn test_touch_updates_online_and_last_seen() {
        // Arrange
        let mut dev = DeviceDescriptor::unidentified("10.0.0.1", 80);
        let before = dev.last_seen;

        // Act
        dev.touch(true);

        // Assert
        assert!(dev.is_online);
        assert!(dev.last_seen >= before);
    }

    #[test]
    fn test_loss_rate_zero_when_nothing_sent() {
        let health = ConnectionHealth {
            is_healthy: true,
            connection_duration: Duration::ZERO,
            packets_sent: 0,
            packets_received: 0,
            packets_lost: 0,
            last_response_time: None,
            issues: vec![],
        };
        assert_eq!(health.loss_rate(), 0.0);
    }

    #[test]
    fn test_loss_rate_computed_from_counters() {
        let health = ConnectionHealth {
            is_healthy: false,
            connection_duration: Duration::from_secs(10),
            packets_sent: 20,
            packets_received: 16,
            packets_lost: 4,
            last_response_time: Some(Duration::from_millis(12)),
            issues: vec!["packet loss above 10%".to_string()],
        };
        assert!((health.loss_rate() - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_connection_state_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let dev = DeviceDescriptor::unidentified("127.0.0.1", 8080);
        let json = serde_json::to_string(&dev).unwrap();
        assert!(json.contains("\"deviceId\""));
        assert!(json.contains("\"isOnline\""));
        assert!(!json.contains("device_id"));
    }
}
