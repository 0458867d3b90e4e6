//! Connection lifecycle management.
//!
//! [`ConnectionManager`] owns the multi-step connect sequence, the refined
//! connection state machine (including `Timeout` and `Unauthorized`), and
//! link-health bookkeeping. It sits on top of any envelope transport.
//!
//! Connect runs four time-boxed steps:
//!
//! 1. raw TCP reachability probe (classifies refused/unreachable/timeout)
//! 2. transport session establishment
//! 3. application-level liveness (`/ping`, catches auth rejection)
//! 4. device identity (`/info`)
//!
//! Only one connect attempt runs at a time. A second attempt does not
//! queue behind the first: it waits briefly for the in-flight attempt and
//! then rejects, so a stuck connect cannot pile up callers.

use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uaswand_core::{ConnectionHealth, ConnectionState, DeviceDescriptor, Envelope, ErrorCode};

use crate::api::WandApi;
use crate::cancel::CancelToken;
use crate::config::ConnectionConfig;
use crate::transport::{StateCell, WandTransport};

/// How long a second connect attempt waits for an in-flight one before
/// rejecting.
const CONNECT_BUSY_WAIT: Duration = Duration::from_millis(100);

/// Push notifications emitted while connecting and afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The refined connection state changed.
    StateChanged(ConnectionState),
    /// A user-facing progress message.
    Progress(String),
}

#[derive(Debug, Default, Clone, Copy)]
struct LinkCounters {
    sent: u64,
    received: u64,
    lost: u64,
}

/// Manages one device connection end to end.
pub struct ConnectionManager {
    api: WandApi,
    transport: Arc<dyn WandTransport>,
    step_timeout: Duration,
    latency_warn: Duration,
    connect_lock: Mutex<()>,
    state: StateCell,
    device: StdMutex<Option<DeviceDescriptor>>,
    last_error: StdMutex<Option<String>>,
    counters: StdMutex<LinkCounters>,
    connected_at: StdMutex<Option<Instant>>,
    events: mpsc::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Builds a manager over `transport` and returns the event stream.
    pub fn new(
        transport: Arc<dyn WandTransport>,
        config: &ConnectionConfig,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events, rx) = mpsc::channel(64);
        let api = WandApi::new(Arc::clone(&transport), config.wifi_restart_settle());
        (
            Self {
                api,
                transport,
                step_timeout: config.command_timeout(),
                latency_warn: Duration::from_millis(config.latency_warn_ms),
                connect_lock: Mutex::new(()),
                state: StateCell::new(),
                device: StdMutex::new(None),
                last_error: StdMutex::new(None),
                counters: StdMutex::new(LinkCounters::default()),
                connected_at: StdMutex::new(None),
                events,
            },
            rx,
        )
    }

    /// Typed command API bound to this connection.
    pub fn api(&self) -> &WandApi {
        &self.api
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    pub fn current_device(&self) -> Option<DeviceDescriptor> {
        self.device
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

    fn set_state(&self, next: ConnectionState) {
        if self.state.set(next) {
            // Fire-and-forget; a full event queue must never stall the
            // connection path.
            let _ = self.events.try_send(ConnectionEvent::StateChanged(next));
        }
    }

    fn progress(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        let _ = self.events.try_send(ConnectionEvent::Progress(message));
    }

    fn fail(&self, state: ConnectionState, message: String) -> bool {
        warn!("{message}");
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
        self.set_state(state);
        false
    }

    fn count_exchange(&self, succeeded: bool) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.sent += 1;
        if succeeded {
            counters.received += 1;
        } else {
            counters.lost += 1;
        }
    }

    /// Runs the full connect sequence against `host:port`.
    ///
    /// Returns `false` on any failure, leaving the refined state
    /// (`Error`/`Timeout`/`Unauthorized`) and `last_error` describing it.
    pub async fn connect(&self, host: &str, port: u16, cancel: &CancelToken) -> bool {
        // Bounded wait: reject rather than queue behind a stuck attempt.
        let guard = tokio::time::timeout(CONNECT_BUSY_WAIT, self.connect_lock.lock()).await;
        let Ok(_guard) = guard else {
            self.progress(format!(
                "Connection attempt to {host}:{port} rejected: another attempt is in progress"
            ));
            return false;
        };

        // Step 1: raw reachability, so failures classify before the
        // transport layers its own behavior on top.
        self.set_state(ConnectionState::Connecting);
        self.progress(format!("Step 1/4: checking {host}:{port} is reachable"));
        let probe = crate::cancel::with_deadline(
            self.step_timeout,
            cancel,
            TcpStream::connect((host, port)),
        )
        .await;
        match probe {
            Ok(Ok(stream)) => drop(stream),
            Ok(Err(e)) => {
                return self.fail(
                    ConnectionState::Error,
                    classify_socket_error(&e, host, port),
                );
            }
            Err(crate::cancel::Interrupted::Timeout) => {
                return self.fail(
                    ConnectionState::Timeout,
                    format!("Connection to {host}:{port} timed out"),
                );
            }
            Err(crate::cancel::Interrupted::Cancelled) => {
                return self.fail(
                    ConnectionState::Disconnected,
                    format!("Connection to {host}:{port} cancelled"),
                );
            }
        }

        // Step 2: establish the transport session.
        self.progress("Step 2/4: opening transport session".to_string());
        if !self.transport.connect(host, port, cancel).await {
            let reason = self
                .transport
                .last_error()
                .unwrap_or_else(|| "transport connect failed".to_string());
            let state = match self.transport.connection_state() {
                ConnectionState::Unauthorized => ConnectionState::Unauthorized,
                ConnectionState::Timeout => ConnectionState::Timeout,
                _ => ConnectionState::Error,
            };
            return self.fail(state, reason);
        }

        // Step 3: the device answers application-level commands.
        self.progress("Step 3/4: verifying the device responds".to_string());
        let ping = self.api.keep_alive(cancel).await;
        self.count_exchange(ping.success);
        if !ping.success {
            self.transport.disconnect().await;
            return self.fail(
                refined_failure_state(&ping),
                format!("Device at {host}:{port} did not answer ping: {}", ping.message),
            );
        }

        // Step 4: read identity. The descriptor the device reports is
        // corrected with the endpoint we actually reached it on.
        self.progress("Step 4/4: reading device identity".to_string());
        let info = self.api.device_info(cancel).await;
        self.count_exchange(info.success);
        let descriptor = match info.data {
            Some(mut descriptor) if info.success => {
                descriptor.host = host.to_string();
                descriptor.port = port;
                descriptor.touch(true);
                descriptor.connection_state = ConnectionState::Connected;
                descriptor
            }
            _ => {
                self.transport.disconnect().await;
                return self.fail(
                    refined_failure_state(&info),
                    format!(
                        "Device at {host}:{port} did not report its identity: {}",
                        info.message
                    ),
                );
            }
        };

        self.progress(format!(
            "Connected to {} ({host}:{port})",
            descriptor.name
        ));
        *self.device.lock().unwrap_or_else(|e| e.into_inner()) = Some(descriptor);
        *self.connected_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        *self.counters.lock().unwrap_or_else(|e| e.into_inner()) = LinkCounters::default();
        self.set_state(ConnectionState::Connected);
        true
    }

    /// Tears the connection down and resets bookkeeping.
    pub async fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnecting);
        self.transport.disconnect().await;
        *self.device.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.connected_at.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.set_state(ConnectionState::Disconnected);
        self.progress("Disconnected".to_string());
    }

    /// Probes the link and reports health counters.
    ///
    /// One keep-alive round trip is issued; its outcome feeds the
    /// sent/received/lost counters. Healthy means no issues: connected,
    /// ping answered, loss under 10 percent, latency under the configured
    /// warning threshold.
    pub async fn health_check(&self, cancel: &CancelToken) -> ConnectionHealth {
        let mut issues = Vec::new();

        if !self.is_connected() {
            return ConnectionHealth {
                is_healthy: false,
                connection_duration: Duration::ZERO,
                packets_sent: 0,
                packets_received: 0,
                packets_lost: 0,
                last_response_time: None,
                issues: vec!["not connected".to_string()],
            };
        }

        let started = Instant::now();
        let ping = self.api.keep_alive(cancel).await;
        let round_trip = started.elapsed();
        self.count_exchange(ping.success);

        let mut last_response_time = None;
        if ping.success {
            last_response_time = Some(round_trip);
            if round_trip > self.latency_warn {
                issues.push(format!(
                    "round trip {}ms exceeds {}ms",
                    round_trip.as_millis(),
                    self.latency_warn.as_millis()
                ));
            }
        } else {
            issues.push(format!("keep-alive failed: {}", ping.message));
        }

        let counters = *self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let mut health = ConnectionHealth {
            is_healthy: false,
            connection_duration: self
                .connected_at
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO),
            packets_sent: counters.sent,
            packets_received: counters.received,
            packets_lost: counters.lost,
            last_response_time,
            issues,
        };

        if health.loss_rate() > 0.10 {
            health.issues.push(format!(
                "packet loss {:.0}% exceeds 10%",
                health.loss_rate() * 100.0
            ));
        }
        health.is_healthy = health.issues.is_empty();
        if !health.is_healthy {
            warn!(issues = ?health.issues, "connection health degraded");
        }
        health
    }
}

/// Picks the refined failure state for a failed application exchange.
fn refined_failure_state<T>(envelope: &Envelope<T>) -> ConnectionState {
    if envelope.is_error(ErrorCode::Unauthorized) {
        ConnectionState::Unauthorized
    } else if envelope.is_error(ErrorCode::Timeout) {
        ConnectionState::Timeout
    } else {
        ConnectionState::Error
    }
}

/// Renders a socket-level connect failure as an actionable message.
fn classify_socket_error(e: &std::io::Error, host: &str, port: u16) -> String {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::ConnectionRefused => {
            format!("Connection refused by {host}:{port} (no service listening)")
        }
        ErrorKind::TimedOut => format!("Connection to {host}:{port} timed out"),
        ErrorKind::AddrNotAvailable => format!("Address {host} is not available"),
        _ => match e.raw_os_error() {
            // EHOSTUNREACH / WSAEHOSTUNREACH
            Some(113) | Some(10065) => format!("Host {host} is unreachable"),
            // ENETUNREACH / WSAENETUNREACH
            Some(101) | Some(10051) => format!("Network to {host} is unreachable"),
            _ => format!("Connection to {host}:{port} failed: {e}"),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
