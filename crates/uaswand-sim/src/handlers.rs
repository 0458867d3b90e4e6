//! Command dispatch shared by both server fronts.
//!
//! Routing is an explicit match on `(method, path)`. Unknown combinations
//! answer with an `UNKNOWN_COMMAND` failure envelope rather than being
//! dropped, so a misdialled client still gets a well-formed response.

use serde_json::{json, Value};
use tracing::debug;
use uaswand_core::{CodedReply, CommandRequest, Envelope, ErrorCode, WifiSettings};

use crate::state::SimState;

/// Handles one request against the simulated device.
pub async fn dispatch(state: &SimState, request: &CommandRequest) -> Envelope<Value> {
    if !state.latency.is_zero() {
        tokio::time::sleep(state.latency).await;
    }

    let method = request.method.to_ascii_uppercase();
    let path = request.path().to_string();
    debug!(%method, %path, "handling simulated request");

    match (method.as_str(), path.as_str()) {
        ("GET", "/info") => success(state.descriptor(), "device info"),

        ("GET", "/ping") => success(
            CodedReply {
                code: 0,
                message: "pong".to_string(),
            },
            "pong",
        ),

        ("GET", "/wifi") => success(state.wifi(), "wifi configuration"),

        ("POST", "/wifi") => {
            let Some(payload) = &request.payload else {
                return invalid("POST /wifi requires a settings body");
            };
            let settings: WifiSettings = match serde_json::from_value(payload.clone()) {
                Ok(settings) => settings,
                Err(e) => return invalid(format!("malformed wifi settings: {e}")),
            };
            state.apply_wifi(&settings);
            success(
                CodedReply {
                    code: 0,
                    message: "wifi settings updated".to_string(),
                },
                "wifi settings updated",
            )
        }

        ("POST", "/wifi/restart") => success(
            CodedReply {
                code: 0,
                message: "wifi restarting".to_string(),
            },
            "wifi restarting",
        ),

        ("POST", "/scan") => {
            let code = request
                .payload
                .as_ref()
                .and_then(|p| p.get("scan"))
                .and_then(Value::as_i64);
            match code {
                Some(1) => success(state.start_scan(), "scan started"),
                Some(0) => success(state.stop_scan(), "scan stopped"),
                _ => invalid("POST /scan requires {\"scan\": 0|1}"),
            }
        }

        ("GET", "/scan") => success(state.scan_status(), "scan status"),

        ("POST", "/scan/stop") => success(state.stop_scan(), "scan stopped"),

        ("GET", "/live") => {
            let start_index = match parse_query(request, "startIndex", 0) {
                Ok(v) => v,
                Err(e) => return invalid(e),
            };
            let num_points = match parse_query(request, "numPoints", 32) {
                Ok(v) => v,
                Err(e) => return invalid(e),
            };
            success(state.live_reading(start_index, num_points), "live readings")
        }

        ("GET", "/measurement") => success(state.measurement(), "latest measurement"),

        ("POST", "/sleep") => success(
            CodedReply {
                code: 0,
                message: "entering sleep".to_string(),
            },
            "entering sleep",
        ),

        // Challenge/response authentication is not enforced yet; the
        // endpoints answer with fixed shapes so clients can integrate.
        ("GET", "/auth") => success(
            json!({
                "challenge": vec![0u8; 16],
                "challengeId": uuid::Uuid::new_v4().to_string(),
                "timestamp": chrono::Utc::now().timestamp(),
            }),
            "auth challenge",
        ),

        ("POST", "/auth") => success(
            json!({
                "authenticated": true,
                "token": "sim-token",
                "expiresIn": 3600,
                "message": "simulator accepts any response",
            }),
            "authenticated",
        ),

        _ => Envelope::failure(
            format!("no handler for {method} {path}"),
            ErrorCode::UnknownCommand,
        ),
    }
}

fn success<T: serde::Serialize>(data: T, message: &str) -> Envelope<Value> {
    match serde_json::to_value(data) {
        Ok(value) => Envelope::success(value, message),
        Err(e) => Envelope::failure(
            format!("could not serialize response: {e}"),
            ErrorCode::SerializationError,
        ),
    }
}

fn invalid(message: impl Into<String>) -> Envelope<Value> {
    Envelope::failure(message, ErrorCode::InvalidRequest)
}

fn parse_query(request: &CommandRequest, name: &str, default: u32) -> Result<u32, String> {
    match request.query_param(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| format!("query parameter {name} must be a non-negative integer")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
