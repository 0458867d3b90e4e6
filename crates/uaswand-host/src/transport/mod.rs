//! Transport abstraction over the three ways of reaching a UAS-WAND.
//!
//! Two transports speak the JSON envelope protocol and implement
//! [`WandTransport`]: the length-prefixed TCP socket ([`tcp`]) and the
//! HTTP(S) REST client ([`http`]). The USB serial link ([`serial`]) is
//! line-oriented rather than envelope-oriented and exposes the same
//! connect/disconnect/state surface as a standalone service.
//!
//! Expected connection failures (device off, port closed, wrong subnet) are
//! routine during discovery sweeps, so `connect` returns `bool` instead of
//! `Result`; the failure detail stays retrievable via `last_error`.

pub mod http;
pub mod serial;
pub mod tcp;

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uaswand_core::{CodecError, CommandRequest, ConnectionState, DeviceDescriptor, Envelope, ErrorCode};

use crate::cancel::CancelToken;

/// Errors surfaced by transport operations.
///
/// Each variant maps onto exactly one wire [`ErrorCode`], so a transport
/// failure can always be reported to callers as a failure envelope.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to a device")]
    NotConnected,

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("device rejected credentials")]
    Unauthorized,

    #[error("device returned HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("network I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl TransportError {
    /// The wire error code this failure reports as.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TransportError::NotConnected => ErrorCode::NotConnected,
            TransportError::Timeout => ErrorCode::Timeout,
            TransportError::Cancelled => ErrorCode::Cancelled,
            TransportError::Unauthorized => ErrorCode::Unauthorized,
            TransportError::HttpStatus { .. } => ErrorCode::HttpError,
            TransportError::Io(_) | TransportError::Request(_) => ErrorCode::TransportError,
            TransportError::Codec(CodecError::Serialize(_)) => ErrorCode::SerializationError,
            TransportError::Codec(_) => ErrorCode::TransportError,
        }
    }

    /// Renders this failure as an error envelope for the caller.
    pub fn into_envelope<T>(self) -> Envelope<T> {
        Envelope::failure(self.to_string(), self.error_code())
    }
}

impl From<crate::cancel::Interrupted> for TransportError {
    fn from(i: crate::cancel::Interrupted) -> Self {
        match i {
            crate::cancel::Interrupted::Timeout => TransportError::Timeout,
            crate::cancel::Interrupted::Cancelled => TransportError::Cancelled,
        }
    }
}

// ── Connection state cell ─────────────────────────────────────────────────────

/// Holds the current [`ConnectionState`] and broadcasts transitions.
///
/// Observers receive exactly one notification per actual transition;
/// re-setting the current state is silently dropped.
#[derive(Debug)]
pub struct StateCell {
    current: Mutex<ConnectionState>,
    tx: broadcast::Sender<ConnectionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            current: Mutex::new(ConnectionState::Disconnected),
            tx,
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Transitions to `next`, returning true if the state actually changed.
    pub fn set(&self, next: ConnectionState) -> bool {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if *current == next {
            return false;
        }
        debug!(from = %current, to = %next, "connection state transition");
        *current = next;
        // A send error just means nobody is subscribed right now.
        let _ = self.tx.send(next);
        true
    }

    /// Subscribes to future state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

// ── Transport trait ───────────────────────────────────────────────────────────

/// Common surface of the envelope-speaking transports (framed TCP, HTTP).
///
/// Implementations take `&self` and use interior mutability so a transport
/// can be shared as `Arc<dyn WandTransport>` across the connection manager
/// and discovery engine.
#[async_trait]
pub trait WandTransport: Send + Sync {
    /// Attempts to connect to `host:port`.
    ///
    /// Returns `false` on failure (expected during sweeps); the reason is
    /// available from [`last_error`](WandTransport::last_error). A transport
    /// that is already connected disconnects first.
    async fn connect(&self, host: &str, port: u16, cancel: &CancelToken) -> bool;

    /// Tears down the connection and transitions to `Disconnected`.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn connection_state(&self) -> ConnectionState;

    /// Descriptor of the currently connected device, if any.
    fn current_device(&self) -> Option<DeviceDescriptor>;

    /// Human-readable reason for the most recent failure.
    fn last_error(&self) -> Option<String>;

    /// Subscribes to connection state transitions.
    fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState>;

    /// Sends one command and returns the device's response envelope.
    ///
    /// Never returns `Err`: transport failures degrade into failure
    /// envelopes carrying the matching error code.
    async fn send_request(
        &self,
        request: CommandRequest,
        cancel: &CancelToken,
    ) -> Envelope<serde_json::Value>;

    /// Exchanges pre-encoded bytes for the device's raw reply bytes.
    ///
    /// Bypasses the request/envelope types for callers that already hold
    /// wire-format payloads (pass-through tooling, protocol debugging).
    /// The same per-exchange timeout and cancel composition applies.
    async fn send_raw(&self, bytes: &[u8], cancel: &CancelToken)
        -> Result<Vec<u8>, TransportError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_notifies_once_per_transition() {
        // Arrange
        let cell = StateCell::new();
        let mut rx = cell.subscribe();

        // Act: the second identical set must not notify
        assert!(cell.set(ConnectionState::Connecting));
        assert!(!cell.set(ConnectionState::Connecting));
        assert!(cell.set(ConnectionState::Connected));

        // Assert
        assert_eq!(rx.try_recv().unwrap(), ConnectionState::Connecting);
        assert_eq!(rx.try_recv().unwrap(), ConnectionState::Connected);
        assert!(rx.try_recv().is_err(), "no duplicate notifications");
    }

    #[test]
    fn test_transport_error_maps_to_wire_codes() {
        assert_eq!(
            TransportError::NotConnected.error_code(),
            ErrorCode::NotConnected
        );
        assert_eq!(TransportError::Timeout.error_code(), ErrorCode::Timeout);
        assert_eq!(TransportError::Cancelled.error_code(), ErrorCode::Cancelled);
        assert_eq!(
            TransportError::HttpStatus { status: 500 }.error_code(),
            ErrorCode::HttpError
        );
        assert_eq!(
            TransportError::Unauthorized.error_code(),
            ErrorCode::Unauthorized
        );
    }

    #[test]
    fn test_transport_error_into_envelope_is_failure() {
        let env: Envelope<()> = TransportError::Timeout.into_envelope();
        assert!(!env.success);
        assert!(env.is_error(ErrorCode::Timeout));
    }
}
