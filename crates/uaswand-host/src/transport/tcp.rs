//! Length-prefixed TCP transport.
//!
//! Wire format: each message is a 4-byte little-endian payload length
//! followed by that many bytes of UTF-8 JSON. Requests are
//! [`CommandRequest`] values, responses are [`Envelope`]s. The length
//! prefix is validated against [`MAX_FRAME_BYTES`] before any payload
//! allocation.
//!
//! One request/response exchange holds the stream lock for its full
//! duration, so concurrent callers serialize cleanly instead of
//! interleaving frames.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uaswand_core::{
    decode_envelope, encode_request, frame, frame_len, CommandRequest, ConnectionState,
    DeviceDescriptor, Envelope,
};

use crate::cancel::CancelToken;
use crate::config::ConnectionConfig;
use crate::transport::{StateCell, TransportError, WandTransport};

/// Envelope transport over a raw framed TCP socket.
pub struct FramedTcpTransport {
    connect_timeout: Duration,
    exchange_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
    state: StateCell,
    device: StdMutex<Option<DeviceDescriptor>>,
    last_error: StdMutex<Option<String>>,
}

impl FramedTcpTransport {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            exchange_timeout: config.command_timeout(),
            stream: Mutex::new(None),
            state: StateCell::new(),
            device: StdMutex::new(None),
            last_error: StdMutex::new(None),
        }
    }

    /// Transport with an explicit per-exchange deadline, used by discovery
    /// probes which need much shorter timeouts than interactive commands.
    pub fn with_timeouts(connect_timeout: Duration, exchange_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            exchange_timeout,
            stream: Mutex::new(None),
            state: StateCell::new(),
            device: StdMutex::new(None),
            last_error: StdMutex::new(None),
        }
    }

    fn record_error(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    /// Writes one framed request and reads one framed response.
    ///
    /// The caller must hold the stream lock. Any I/O error leaves the
    /// stream in an unknown framing position, so errors here are fatal for
    /// the connection.
    async fn exchange_locked(
        stream: &mut TcpStream,
        request: &CommandRequest,
    ) -> Result<Vec<u8>, TransportError> {
        let payload = encode_request(request)?;
        Self::exchange_bytes_locked(stream, &payload).await
    }

    /// Frames `payload`, writes it, and reads back one framed reply.
    async fn exchange_bytes_locked(
        stream: &mut TcpStream,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let framed = frame(payload)?;
        stream.write_all(&framed).await?;

        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await?;
        let len = frame_len(prefix)?;

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        Ok(body)
    }

    /// Drops the stream and records the failure without changing
    /// `last_error` bookkeeping done by the caller.
    async fn teardown(&self, next_state: ConnectionState) {
        let mut guard = self.stream.lock().await;
        *guard = None;
        drop(guard);
        *self.device.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.state.set(next_state);
    }
}

#[async_trait]
impl WandTransport for FramedTcpTransport {
    async fn connect(&self, host: &str, port: u16, cancel: &CancelToken) -> bool {
        if self.is_connected() {
            self.disconnect().await;
        }

        self.state.set(ConnectionState::Connecting);
        debug!(host, port, "opening framed TCP connection");

        let attempt = crate::cancel::with_deadline(
            self.connect_timeout,
            cancel,
            TcpStream::connect((host, port)),
        )
        .await;

        let stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.record_error(format!("connect to {host}:{port} failed: {e}"));
                self.teardown(ConnectionState::Error).await;
                return false;
            }
            Err(interrupted) => {
                let err: TransportError = interrupted.into();
                self.record_error(format!("connect to {host}:{port} failed: {err}"));
                let next = match err {
                    TransportError::Timeout => ConnectionState::Timeout,
                    _ => ConnectionState::Disconnected,
                };
                self.teardown(next).await;
                return false;
            }
        };

        // Framed exchanges are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not set TCP_NODELAY");
        }

        *self.stream.lock().await = Some(stream);
        let mut descriptor = DeviceDescriptor::unidentified(host, port);
        descriptor.touch(true);
        descriptor.connection_state = ConnectionState::Connected;
        *self.device.lock().unwrap_or_else(|e| e.into_inner()) = Some(descriptor);
        self.state.set(ConnectionState::Connected);
        true
    }

    async fn disconnect(&self) {
        self.teardown(ConnectionState::Disconnected).await;
    }

    fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    fn current_device(&self) -> Option<DeviceDescriptor> {
        self.device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn send_request(
        &self,
        request: CommandRequest,
        cancel: &CancelToken,
    ) -> Envelope<serde_json::Value> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return TransportError::NotConnected.into_envelope();
        };

        let outcome = crate::cancel::with_deadline(
            self.exchange_timeout,
            cancel,
            Self::exchange_locked(stream, &request),
        )
        .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(interrupted) => Err(interrupted.into()),
        };

        match result {
            Ok(body) => decode_envelope(&body),
            Err(err) => {
                // Any failed exchange leaves the stream mid-frame. The
                // connection is unusable, so drop it.
                warn!(endpoint = %request.endpoint, error = %err, "framed exchange failed, dropping connection");
                drop(guard);
                self.record_error(err.to_string());
                self.teardown(ConnectionState::Error).await;
                err.into_envelope()
            }
        }
    }

    async fn send_raw(
        &self,
        bytes: &[u8],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let outcome = crate::cancel::with_deadline(
            self.exchange_timeout,
            cancel,
            Self::exchange_bytes_locked(stream, bytes),
        )
        .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(interrupted) => Err(interrupted.into()),
        };

        if let Err(err) = &result {
            warn!(error = %err, "raw framed exchange failed, dropping connection");
            drop(guard);
            self.record_error(err.to_string());
            self.teardown(ConnectionState::Error).await;
        }
        result
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
