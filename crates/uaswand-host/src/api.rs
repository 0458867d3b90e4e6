//! Typed device operations over an envelope transport.
//!
//! [`WandApi`] turns the raw `send_request` surface into one method per
//! firmware endpoint, re-typing each response payload. Endpoint paths and
//! payload shapes are identical across the framed-TCP and HTTP transports,
//! so this layer is transport-agnostic.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;
use uaswand_core::{
    AuthChallenge, AuthResult, CodedReply, CommandRequest, DeviceDescriptor, Envelope, LiveReading,
    Measurement, ScanCommand, ScanStatus, WifiConfiguration, WifiSettings,
};

use crate::cancel::CancelToken;
use crate::transport::WandTransport;

/// High-level client for the UAS-WAND command set.
#[derive(Clone)]
pub struct WandApi {
    transport: Arc<dyn WandTransport>,
    wifi_restart_settle: Duration,
}

impl WandApi {
    pub fn new(transport: Arc<dyn WandTransport>, wifi_restart_settle: Duration) -> Self {
        Self {
            transport,
            wifi_restart_settle,
        }
    }

    pub fn transport(&self) -> &Arc<dyn WandTransport> {
        &self.transport
    }

    /// `GET /info`: identity and firmware details.
    pub async fn device_info(&self, cancel: &CancelToken) -> Envelope<DeviceDescriptor> {
        self.transport
            .send_request(CommandRequest::get("/info"), cancel)
            .await
            .into_typed()
    }

    /// `GET /ping`: liveness check, also used as the connection keep-alive.
    pub async fn keep_alive(&self, cancel: &CancelToken) -> Envelope<CodedReply> {
        self.transport
            .send_request(CommandRequest::get("/ping"), cancel)
            .await
            .into_typed()
    }

    /// `GET /wifi`: current radio configuration.
    pub async fn wifi_settings(&self, cancel: &CancelToken) -> Envelope<WifiConfiguration> {
        self.transport
            .send_request(CommandRequest::get("/wifi"), cancel)
            .await
            .into_typed()
    }

    /// `POST /wifi`: update the radio configuration.
    pub async fn set_wifi_settings(
        &self,
        settings: &WifiSettings,
        cancel: &CancelToken,
    ) -> Envelope<CodedReply> {
        let payload = match serde_json::to_value(settings) {
            Ok(v) => v,
            Err(e) => {
                return Envelope::failure(
                    format!("could not serialize wifi settings: {e}"),
                    uaswand_core::ErrorCode::SerializationError,
                )
            }
        };
        self.transport
            .send_request(CommandRequest::post("/wifi", Some(payload)), cancel)
            .await
            .into_typed()
    }

    /// `POST /wifi/restart`: bounce the radio so new settings take effect.
    ///
    /// The device acknowledges before the radio is actually back; a fixed
    /// settle delay runs before this returns so follow-up requests do not
    /// race the restart.
    pub async fn restart_wifi(&self, cancel: &CancelToken) -> Envelope<CodedReply> {
        let envelope: Envelope<CodedReply> = self
            .transport
            .send_request(CommandRequest::post("/wifi/restart", None), cancel)
            .await
            .into_typed();

        if envelope.success {
            info!(
                settle_secs = self.wifi_restart_settle.as_secs(),
                "wifi restarting, waiting for the link to settle"
            );
            tokio::time::sleep(self.wifi_restart_settle).await;
        }
        envelope
    }

    /// `POST /scan` with `{"scan": 1}`: begin a measurement scan.
    pub async fn start_scan(&self, cancel: &CancelToken) -> Envelope<ScanStatus> {
        self.transport
            .send_request(
                CommandRequest::post("/scan", Some(ScanCommand::Start.to_payload())),
                cancel,
            )
            .await
            .into_typed()
    }

    /// `GET /scan`: scan progress.
    pub async fn scan_status(&self, cancel: &CancelToken) -> Envelope<ScanStatus> {
        self.transport
            .send_request(CommandRequest::get("/scan"), cancel)
            .await
            .into_typed()
    }

    /// `POST /scan/stop`: abort a running scan.
    pub async fn stop_scan(&self, cancel: &CancelToken) -> Envelope<ScanStatus> {
        self.transport
            .send_request(CommandRequest::post("/scan/stop", None), cancel)
            .await
            .into_typed()
    }

    /// `GET /live?startIndex=..&numPoints=..`: a window of live samples.
    pub async fn live_reading(
        &self,
        start_index: u32,
        num_points: u32,
        cancel: &CancelToken,
    ) -> Envelope<LiveReading> {
        let endpoint = format!("/live?startIndex={start_index}&numPoints={num_points}");
        self.transport
            .send_request(CommandRequest::get(endpoint), cancel)
            .await
            .into_typed()
    }

    /// `GET /measurement`: the most recent completed measurement.
    pub async fn measurement(&self, cancel: &CancelToken) -> Envelope<Measurement> {
        self.transport
            .send_request(CommandRequest::get("/measurement"), cancel)
            .await
            .into_typed()
    }

    /// `POST /sleep`: put the device into low-power mode. The device
    /// drops the link once it acknowledges.
    pub async fn sleep(&self, cancel: &CancelToken) -> Envelope<CodedReply> {
        let envelope: Envelope<CodedReply> = self
            .transport
            .send_request(CommandRequest::post("/sleep", None), cancel)
            .await
            .into_typed();

        if envelope.success {
            self.transport.disconnect().await;
        }
        envelope
    }

    /// `GET /auth`: fetch a challenge for the (not yet enforced)
    /// challenge/response handshake.
    pub async fn auth_challenge(&self, cancel: &CancelToken) -> Envelope<AuthChallenge> {
        self.transport
            .send_request(CommandRequest::get("/auth"), cancel)
            .await
            .into_typed()
    }

    /// `POST /auth`: submit a challenge response.
    pub async fn authenticate(
        &self,
        challenge_id: &str,
        response: &[u8],
        cancel: &CancelToken,
    ) -> Envelope<AuthResult> {
        let payload = json!({
            "challengeId": challenge_id,
            "response": response,
        });
        self.transport
            .send_request(CommandRequest::post("/auth", Some(payload)), cancel)
            .await
            .into_typed()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::broadcast;
    use uaswand_core::{ConnectionState, ErrorCode};

    /// Canned-response transport that records the requests it receives.
    struct ScriptedTransport {
        requests: Mutex<Vec<CommandRequest>>,
        reply: Envelope<serde_json::Value>,
        state: crate::transport::StateCell,
    }

    impl ScriptedTransport {
        fn replying(reply: Envelope<serde_json::Value>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                reply,
                state: crate::transport::StateCell::new(),
            })
        }

        fn seen(&self) -> Vec<CommandRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WandTransport for ScriptedTransport {
        async fn connect(&self, _host: &str, _port: u16, _cancel: &CancelToken) -> bool {
            self.state.set(ConnectionState::Connected);
            true
        }

        async fn disconnect(&self) {
            self.state.set(ConnectionState::Disconnected);
        }

        fn is_connected(&self) -> bool {
            self.state.get() == ConnectionState::Connected
        }

        fn connection_state(&self) -> ConnectionState {
            self.state.get()
        }

        fn current_device(&self) -> Option<DeviceDescriptor> {
            None
        }

        fn last_error(&self) -> Option<String> {
            None
        }

        fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
            self.state.subscribe()
        }

        async fn send_request(
            &self,
            request: CommandRequest,
            _cancel: &CancelToken,
        ) -> Envelope<serde_json::Value> {
            self.requests.lock().unwrap().push(request);
            self.reply.clone()
        }

        async fn send_raw(
            &self,
            bytes: &[u8],
            _cancel: &CancelToken,
        ) -> Result<Vec<u8>, crate::transport::TransportError> {
            Ok(bytes.to_vec())
        }
    }

    fn api_over(transport: Arc<ScriptedTransport>) -> WandApi {
        WandApi::new(transport, Duration::from_millis(0))
    }

    #[tokio::test]
    async fn test_keep_alive_issues_get_ping() {
        // Arrange
        let transport =
            ScriptedTransport::replying(Envelope::success(json!({"code": 0}), "pong"));
        let api = api_over(Arc::clone(&transport));

        // Act
        let env = api.keep_alive(&CancelToken::new()).await;

        // Assert
        assert!(env.success);
        assert!(env.data.unwrap().is_ok());
        let seen = transport.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].endpoint, "/ping");
        assert_eq!(seen[0].method, "GET");
    }

    #[tokio::test]
    async fn test_start_scan_posts_scan_one_payload() {
        // Arrange
        let transport = ScriptedTransport::replying(Envelope::success(
            json!({"status": 1, "progress": 0, "totalPoints": 0}),
            "started",
        ));
        let api = api_over(Arc::clone(&transport));

        // Act
        let env = api.start_scan(&CancelToken::new()).await;

        // Assert
        assert!(env.success);
        assert!(env.data.unwrap().is_scanning());
        let seen = transport.seen();
        assert_eq!(seen[0].endpoint, "/scan");
        assert_eq!(seen[0].payload, Some(json!({"scan": 1})));
    }

    #[tokio::test]
    async fn test_live_reading_builds_query_string() {
        // Arrange
        let transport = ScriptedTransport::replying(Envelope::success(
            json!({
                "deviceId": "SIM-001",
                "startIndex": 16,
                "readings": [],
                "totalSamples": 0,
                "sampleRate": 100
            }),
            "ok",
        ));
        let api = api_over(Arc::clone(&transport));

        // Act
        let env = api.live_reading(16, 32, &CancelToken::new()).await;

        // Assert
        assert!(env.success);
        let seen = transport.seen();
        assert_eq!(seen[0].endpoint, "/live?startIndex=16&numPoints=32");
    }

    #[tokio::test]
    async fn test_sleep_disconnects_after_acknowledgement() {
        // Arrange
        let transport =
            ScriptedTransport::replying(Envelope::success(json!({"code": 0}), "sleeping"));
        let api = api_over(Arc::clone(&transport));
        transport.connect("h", 80, &CancelToken::new()).await;

        // Act
        let env = api.sleep(&CancelToken::new()).await;

        // Assert
        assert!(env.success);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_mismatched_payload_degrades_to_deserialization_error() {
        // Arrange: /scan answered with a shape that is not a ScanStatus
        let transport =
            ScriptedTransport::replying(Envelope::success(json!("not a status"), "ok"));
        let api = api_over(transport);

        // Act
        let env = api.scan_status(&CancelToken::new()).await;

        // Assert
        assert!(env.is_error(ErrorCode::DeserializationError));
    }
}
