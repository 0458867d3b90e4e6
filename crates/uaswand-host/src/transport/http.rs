//! HTTP(S) REST transport.
//!
//! The device exposes the same logical endpoints over HTTP that the framed
//! socket carries in `CommandRequest` frames, so this transport maps each
//! request onto `{base_url}{endpoint}` directly. Every request carries
//! Basic Auth credentials; production devices serve self-signed
//! certificates, so certificate validation is relaxed by configuration
//! (on by default, opt-out).
//!
//! Status handling: 401 is `UNAUTHORIZED`, any other non-2xx is
//! `HTTP_ERROR`. A 2xx body that does not deserialize as an envelope is
//! `PARSE_ERROR`, whether or not it is valid JSON.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uaswand_core::{
    CommandRequest, ConnectionState, DeviceDescriptor, Envelope, ErrorCode,
};

use crate::cancel::CancelToken;
use crate::config::ConnectionConfig;
use crate::transport::{StateCell, TransportError, WandTransport};

/// Envelope transport over the device's REST interface.
pub struct HttpTransport {
    client: reqwest::Client,
    scheme: &'static str,
    username: String,
    password: String,
    exchange_timeout: Duration,
    base_url: StdMutex<Option<String>>,
    state: StateCell,
    device: StdMutex<Option<DeviceDescriptor>>,
    last_error: StdMutex<Option<String>>,
}

impl HttpTransport {
    /// Builds the transport and its underlying client.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot be
    /// initialized.
    pub fn new(config: &ConnectionConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.command_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            scheme: if config.use_https { "https" } else { "http" },
            username: config.username.clone(),
            password: config.password.clone(),
            exchange_timeout: config.command_timeout(),
            base_url: StdMutex::new(None),
            state: StateCell::new(),
            device: StdMutex::new(None),
            last_error: StdMutex::new(None),
        })
    }

    fn record_error(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    fn base_url(&self) -> Option<String> {
        self.base_url
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Issues one authenticated request and interprets the response.
    async fn execute(
        &self,
        base: &str,
        request: &CommandRequest,
    ) -> Result<Envelope<serde_json::Value>, TransportError> {
        let url = format!("{base}{}", request.endpoint);
        let method = if request.method.eq_ignore_ascii_case("POST") {
            reqwest::Method::POST
        } else {
            reqwest::Method::GET
        };

        let mut builder = self
            .client
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(TransportError::Unauthorized);
        }
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(interpret_body(&body))
    }
}

/// Maps a 2xx response body onto an envelope.
///
/// The firmware always answers with a full envelope. A body that does not
/// deserialize as one is some other service answering on the device's
/// port, so it is rejected rather than passed along as device data.
fn interpret_body(body: &[u8]) -> Envelope<serde_json::Value> {
    match serde_json::from_slice::<Envelope<serde_json::Value>>(body) {
        Ok(envelope) => envelope,
        Err(e) => Envelope::failure(
            format!("response body was not a protocol envelope: {e}"),
            ErrorCode::ParseError,
        ),
    }
}

#[async_trait]
impl WandTransport for HttpTransport {
    async fn connect(&self, host: &str, port: u16, cancel: &CancelToken) -> bool {
        if self.is_connected() {
            self.disconnect().await;
        }

        self.state.set(ConnectionState::Connecting);
        let base = format!("{}://{host}:{port}", self.scheme);
        debug!(%base, "probing REST interface");

        let ping = CommandRequest::get("/ping");
        let outcome =
            crate::cancel::with_deadline(self.exchange_timeout, cancel, self.execute(&base, &ping))
                .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(interrupted) => Err(interrupted.into()),
        };

        match result {
            Ok(envelope) if envelope.success => {
                *self.base_url.lock().unwrap_or_else(|e| e.into_inner()) = Some(base);
                let mut descriptor = DeviceDescriptor::unidentified(host, port);
                descriptor.touch(true);
                descriptor.connection_state = ConnectionState::Connected;
                *self.device.lock().unwrap_or_else(|e| e.into_inner()) = Some(descriptor);
                self.state.set(ConnectionState::Connected);
                true
            }
            Ok(envelope) => {
                self.record_error(format!(
                    "device rejected connection ping: {} ({})",
                    envelope.message, envelope.error_code
                ));
                self.state.set(ConnectionState::Error);
                false
            }
            Err(TransportError::Unauthorized) => {
                self.record_error(format!("credentials rejected by {host}:{port}"));
                self.state.set(ConnectionState::Unauthorized);
                false
            }
            Err(TransportError::Timeout) => {
                self.record_error(format!("connection ping to {host}:{port} timed out"));
                self.state.set(ConnectionState::Timeout);
                false
            }
            Err(err) => {
                self.record_error(format!("connect to {host}:{port} failed: {err}"));
                self.state.set(ConnectionState::Error);
                false
            }
        }
    }

    async fn disconnect(&self) {
        // Stateless protocol; dropping the base URL is the whole teardown.
        *self.base_url.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.device.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.state.set(ConnectionState::Disconnected);
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
        let Some(base) = self.base_url() else {
            return TransportError::NotConnected.into_envelope();
        };

        let outcome = crate::cancel::with_deadline(
            self.exchange_timeout,
            cancel,
            self.execute(&base, &request),
        )
        .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(interrupted) => Err(interrupted.into()),
        };

        match result {
            Ok(envelope) => envelope,
            Err(TransportError::Unauthorized) => {
                // Credentials changed under us; surface it through the state
                // machine as well as the envelope.
                warn!(endpoint = %request.endpoint, "request rejected as unauthorized");
                self.record_error("credentials rejected".to_string());
                self.state.set(ConnectionState::Unauthorized);
                TransportError::Unauthorized.into_envelope()
            }
            Err(err) => {
                self.record_error(err.to_string());
                err.into_envelope()
            }
        }
    }

    /// Raw byte exchanges have no REST equivalent; the device only accepts
    /// pre-encoded frames on its socket interface.
    async fn send_raw(
        &self,
        _bytes: &[u8],
        _cancel: &CancelToken,
    ) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Request(
            "raw exchanges are not available over the REST interface".to_string(),
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_body_passes_through_envelope() {
        // Arrange
        let body = br#"{"success":true,"data":{"code":0},"message":"pong","errorCode":"","timestamp":"2026-01-01T00:00:00Z"}"#;

        // Act
        let env = interpret_body(body);

        // Assert
        assert!(env.success);
        assert_eq!(env.message, "pong");
    }

    #[test]
    fn test_interpret_body_rejects_bare_json_as_parse_error() {
        // Valid JSON from something that is not a UAS-WAND must not read
        // as a healthy device.
        let env = interpret_body(br#"{"firmware":"3.9.0"}"#);
        assert!(!env.success);
        assert!(env.is_error(ErrorCode::ParseError));
    }

    #[test]
    fn test_interpret_body_rejects_non_json_as_parse_error() {
        let env = interpret_body(b"<html>502 Bad Gateway</html>");
        assert!(env.is_error(ErrorCode::ParseError));
    }

    #[tokio::test]
    async fn test_send_without_connection_is_not_connected_envelope() {
        let transport = HttpTransport::new(&ConnectionConfig::default()).unwrap();
        let cancel = CancelToken::new();
        let env = transport
            .send_request(CommandRequest::get("/info"), &cancel)
            .await;
        assert!(env.is_error(ErrorCode::NotConnected));
    }

    #[tokio::test]
    async fn test_send_raw_is_rejected_over_rest() {
        let transport = HttpTransport::new(&ConnectionConfig::default()).unwrap();
        let err = transport
            .send_raw(b"{}", &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error_state() {
        // Arrange: a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = ConnectionConfig::default();
        config.connect_timeout_secs = 1;
        config.command_timeout_secs = 1;
        let transport = HttpTransport::new(&config).unwrap();
        let cancel = CancelToken::new();

        // Act
        let connected = transport.connect("127.0.0.1", port, &cancel).await;

        // Assert
        assert!(!connected);
        assert!(transport.last_error().is_some());
        assert_eq!(transport.connection_state(), ConnectionState::Error);
    }
}
