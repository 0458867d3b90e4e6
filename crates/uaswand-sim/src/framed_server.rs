//! Framed TCP front of the simulator.
//!
//! Speaks the same wire format the device firmware does: 4-byte
//! little-endian length prefix, JSON payload. Each frame carries one
//! `CommandRequest`; each reply is one framed envelope.
//!
//! Protocol violations (oversized length prefix, payload that is not a
//! valid request) close the connection. There is nothing well-formed to
//! answer, and resynchronising a framed stream after garbage is not
//! possible.
//!
//! Binds to loopback only. The simulator is a development tool and must
//! never be reachable from the network.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uaswand_core::{decode_request, encode_envelope, frame, frame_len};

use crate::handlers;
use crate::state::SimState;

/// Running framed front. Dropping the handle does not stop the server;
/// call [`shutdown`](FramedServer::shutdown).
pub struct FramedServer {
    addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl FramedServer {
    /// Binds `127.0.0.1:port` (0 picks a free port) and starts serving.
    pub async fn start(state: Arc<SimState>, port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "framed TCP front listening");

        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((socket, peer)) => {
                                debug!(%peer, "framed client connected");
                                let state = Arc::clone(&state);
                                tokio::spawn(async move {
                                    if let Err(e) = serve_connection(socket, state).await {
                                        debug!(%peer, error = %e, "framed client closed");
                                    }
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "accept failed");
                            }
                        }
                    }
                    _ = stopped.changed() => {
                        info!("framed TCP front stopping");
                        break;
                    }
                }
            }
        });

        Ok(Self { addr, stop, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stops the accept loop. Connections in flight finish on their own.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Serves one client until it disconnects or violates the protocol.
async fn serve_connection(mut socket: TcpStream, state: Arc<SimState>) -> std::io::Result<()> {
    loop {
        let mut prefix = [0u8; 4];
        match socket.read_exact(&mut prefix).await {
            Ok(_) => {}
            // Clean disconnect between frames.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }

        let len = match frame_len(prefix) {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "dropping client after oversized frame");
                return Ok(());
            }
        };

        let mut payload = vec![0u8; len];
        socket.read_exact(&mut payload).await?;

        let request = match decode_request(&payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "dropping client after malformed request");
                return Ok(());
            }
        };

        let envelope = handlers::dispatch(&state, &request).await;
        let body = match encode_envelope(&envelope) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "could not encode response");
                return Ok(());
            }
        };
        let framed = match frame(&body) {
            Ok(framed) => framed,
            Err(e) => {
                warn!(error = %e, "response exceeded frame limit");
                return Ok(());
            }
        };
        socket.write_all(&framed).await?;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uaswand_core::{CommandRequest, Envelope};

    async fn start() -> FramedServer {
        FramedServer::start(Arc::new(SimState::instant()), 0)
            .await
            .unwrap()
    }

    async fn exchange(
        socket: &mut TcpStream,
        request: &CommandRequest,
    ) -> Envelope<serde_json::Value> {
        let payload = uaswand_core::encode_request(request).unwrap();
        socket.write_all(&frame(&payload).unwrap()).await.unwrap();

        let mut prefix = [0u8; 4];
        socket.read_exact(&mut prefix).await.unwrap();
        let len = frame_len(prefix).unwrap();
        let mut body = vec![0u8; len];
        socket.read_exact(&mut body).await.unwrap();
        uaswand_core::decode_envelope(&body)
    }

    #[tokio::test]
    async fn test_ping_round_trip_over_socket() {
        // Arrange
        let server = start().await;
        let mut socket = TcpStream::connect(server.local_addr()).await.unwrap();

        // Act
        let env = exchange(&mut socket, &CommandRequest::get("/ping")).await;

        // Assert
        assert!(env.success);
        assert_eq!(env.data.unwrap()["code"], 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_multiple_requests_on_one_connection() {
        // Arrange
        let server = start().await;
        let mut socket = TcpStream::connect(server.local_addr()).await.unwrap();

        // Act / Assert: the connection survives across exchanges
        for _ in 0..3 {
            let env = exchange(&mut socket, &CommandRequest::get("/info")).await;
            assert!(env.success);
        }
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_payload_drops_connection() {
        // Arrange
        let server = start().await;
        let mut socket = TcpStream::connect(server.local_addr()).await.unwrap();

        // Act: valid frame, garbage payload
        let framed = frame(b"this is not json").unwrap();
        socket.write_all(&framed).await.unwrap();

        // Assert: the server closes rather than answering
        let mut buf = [0u8; 1];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "connection must be closed");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_drops_connection() {
        // Arrange
        let server = start().await;
        let mut socket = TcpStream::connect(server.local_addr()).await.unwrap();

        // Act: declare a frame over the limit
        let declared = (uaswand_core::MAX_FRAME_BYTES as u32) + 1;
        socket.write_all(&declared.to_le_bytes()).await.unwrap();

        // Assert
        let mut buf = [0u8; 1];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "connection must be closed");
        server.shutdown().await;
    }
}
