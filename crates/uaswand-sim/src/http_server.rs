//! HTTP front of the simulator.
//!
//! Serves the same endpoints as the framed socket by translating each
//! HTTP request into a `CommandRequest` and dispatching into the shared
//! state. Responses are always JSON envelopes with status 200, except the
//! Basic Auth rejection which answers 401 with a `WWW-Authenticate`
//! challenge the way the device firmware does. `/auth` is exempt from the
//! auth check so the (future) challenge handshake can bootstrap.
//!
//! Binds to loopback only, like the framed front.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::Engine;
use tokio::sync::oneshot;
use warp::hyper::body::Bytes;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::path::FullPath;
use warp::{Filter, Reply};

use uaswand_core::{CommandRequest, Envelope, ErrorCode};

use crate::handlers;
use crate::state::SimState;

/// Running HTTP front.
pub struct HttpServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl HttpServer {
    /// Binds `127.0.0.1:port` (0 picks a free port) and starts serving.
    pub fn start(state: Arc<SimState>, port: u16) -> Result<Self, warp::Error> {
        let (stop, stopped) = oneshot::channel::<()>();

        let (addr, server) = warp::serve(routes(state)).try_bind_with_graceful_shutdown(
            (std::net::Ipv4Addr::LOCALHOST, port),
            async {
                let _ = stopped.await;
            },
        )?;
        info!(%addr, "HTTP front listening");

        let task = tokio::spawn(server);
        Ok(Self { addr, stop, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

/// The single catch-all route: every method and path funnels into the
/// shared dispatch table.
fn routes(
    state: Arc<SimState>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = warp::Rejection> + Clone {
    warp::method()
        .and(warp::path::full())
        .and(
            warp::query::raw()
                .or_else(|_| async { Ok::<(String,), warp::Rejection>((String::new(),)) }),
        )
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::bytes())
        .and(warp::any().map(move || Arc::clone(&state)))
        .and_then(handle_request)
}

async fn handle_request(
    method: warp::http::Method,
    path: FullPath,
    query: String,
    authorization: Option<String>,
    body: Bytes,
    state: Arc<SimState>,
) -> Result<warp::reply::Response, std::convert::Infallible> {
    let path = path.as_str().to_string();

    // `/auth` bootstraps the handshake and is the only unauthenticated
    // endpoint.
    if path != "/auth" && !credentials_match(authorization.as_deref(), &state) {
        debug!(%path, "rejecting unauthenticated request");
        let envelope = Envelope::<serde_json::Value>::failure(
            "authentication required",
            ErrorCode::Unauthorized,
        );
        let reply = warp::reply::with_header(
            warp::reply::with_status(warp::reply::json(&envelope), StatusCode::UNAUTHORIZED),
            "WWW-Authenticate",
            "Basic realm=\"UAS-WAND\"",
        );
        return Ok(reply.into_response());
    }

    let payload = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%path, error = %e, "request body was not valid JSON");
                let envelope = Envelope::<serde_json::Value>::failure(
                    format!("request body was not valid JSON: {e}"),
                    ErrorCode::InvalidRequest,
                );
                return Ok(warp::reply::json(&envelope).into_response());
            }
        }
    };

    let endpoint = if query.is_empty() {
        path
    } else {
        format!("{path}?{query}")
    };
    let request = CommandRequest {
        endpoint,
        method: method.as_str().to_string(),
        payload,
    };

    let envelope = handlers::dispatch(&state, &request).await;
    Ok(warp::reply::json(&envelope).into_response())
}

/// Validates a `Basic` authorization header against the state credentials.
fn credentials_match(header: Option<&str>, state: &SimState) -> bool {
    let Some(header) = header else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    match decoded.split_once(':') {
        Some((user, pass)) => user == state.username && pass == state.password,
        None => false,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
