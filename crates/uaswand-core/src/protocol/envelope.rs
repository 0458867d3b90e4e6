//! The response envelope and command wrapper shared by all transports.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Error taxonomy for device communication.
///
/// These are the stable wire strings carried in [`Envelope::error_code`].
/// The device firmware and the simulator both emit exactly these values, so
/// renaming a variant's wire form is a breaking protocol change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No transport is connected to a device.
    NotConnected,
    /// The operation exceeded its deadline.
    Timeout,
    /// The caller cancelled the operation.
    Cancelled,
    /// The device rejected the request credentials (HTTP 401).
    Unauthorized,
    /// The device returned a non-success HTTP status other than 401.
    HttpError,
    /// A request could not be serialized to JSON.
    SerializationError,
    /// A response could not be deserialized into the expected envelope.
    DeserializationError,
    /// A response body was not valid JSON at all.
    ParseError,
    /// A network-level I/O failure (refused, reset, unreachable...).
    TransportError,
    /// The device did not recognize the endpoint or command.
    UnknownCommand,
    /// The request was structurally valid JSON but semantically wrong.
    InvalidRequest,
    /// Catch-all for failures that fit no other category.
    UnexpectedError,
}

impl ErrorCode {
    /// The stable string form used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::HttpError => "HTTP_ERROR",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::TransportError => "TRANSPORT_ERROR",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The standard response wrapper used by every device operation.
///
/// Invariants, enforced by the constructors:
/// - `success == false` implies `data` is `None`.
/// - `error_code` is non-empty whenever `success == false`.
///
/// `error_code` stays a `String` on the wire (rather than a closed enum) so
/// that codes introduced by newer firmware survive a round trip through
/// older host software.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default = "none_data", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_code: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn none_data<T>() -> Option<T> {
    None
}

impl<T> Envelope<T> {
    /// Builds a success envelope carrying `data`.
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            error_code: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Builds a failure envelope. `data` is always absent on failure.
    pub fn failure(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
            error_code: code.as_str().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// True when the envelope reports success.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// True when the failure code matches `code`.
    pub fn is_error(&self, code: ErrorCode) -> bool {
        !self.success && self.error_code == code.as_str()
    }

    /// Converts the payload type, preserving all other fields.
    ///
    /// Used by transports that carry `Envelope<serde_json::Value>` internally
    /// and re-type the data at the API layer.
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            success: self.success,
            data: self.data.map(f),
            message: self.message,
            error_code: self.error_code,
            timestamp: self.timestamp,
        }
    }
}

impl Envelope<serde_json::Value> {
    /// Re-types a raw JSON envelope into `Envelope<T>`.
    ///
    /// A success envelope whose `data` does not match `T` degrades into a
    /// `DESERIALIZATION_ERROR` failure rather than propagating a parse error.
    pub fn into_typed<T: DeserializeOwned>(self) -> Envelope<T> {
        let Envelope {
            success,
            data,
            message,
            error_code,
            timestamp,
        } = self;

        let typed = match data {
            Some(value) => match serde_json::from_value::<T>(value) {
                Ok(t) => Some(t),
                Err(e) => {
                    return Envelope::failure(
                        format!("response data did not match expected shape: {e}"),
                        ErrorCode::DeserializationError,
                    )
                }
            },
            None => None,
        };

        Envelope {
            success,
            data: typed,
            message,
            error_code,
            timestamp,
        }
    }
}

/// Small `{code, message}` payload returned by acknowledgement-style
/// operations (ping, wifi updates, sleep). Code `0` means accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodedReply {
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

impl CodedReply {
    /// True when the device accepted the command.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// The `{endpoint, method, payload}` wrapper carried inside each TCP frame.
///
/// This mirrors the HTTP surface one-to-one so the framed-socket transport
/// and the REST transport express the same logical operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    /// REST-style endpoint path, e.g. `/wifi` or `/live?startIndex=0&numPoints=32`.
    pub endpoint: String,
    /// HTTP method name in upper case (`GET`, `POST`).
    pub method: String,
    /// Optional JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CommandRequest {
    /// Builds a GET request with no body.
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: "GET".to_string(),
            payload: None,
        }
    }

    /// Builds a POST request with an optional JSON body.
    pub fn post(endpoint: impl Into<String>, payload: Option<serde_json::Value>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: "POST".to_string(),
            payload,
        }
    }

    /// The endpoint path without any query string.
    pub fn path(&self) -> &str {
        self.endpoint.split('?').next().unwrap_or(&self.endpoint)
    }

    /// Looks up a query-string parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.endpoint.split_once('?')?.1;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == name).then_some(v)
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_has_data_and_empty_error_code() {
        // Arrange / Act
        let env = Envelope::success(42u32, "ok");

        // Assert
        assert!(env.success);
        assert_eq!(env.data, Some(42));
        assert!(env.error_code.is_empty());
    }

    #[test]
    fn test_failure_envelope_has_no_data_and_nonempty_error_code() {
        // Arrange / Act
        let env = Envelope::<u32>::failure("boom", ErrorCode::Timeout);

        // Assert
        assert!(!env.success);
        assert!(env.data.is_none(), "failure envelopes must not carry data");
        assert_eq!(env.error_code, "TIMEOUT");
    }

    #[test]
    fn test_envelope_serializes_camel_case_fields() {
        // Arrange
        let env = Envelope::<u32>::failure("nope", ErrorCode::NotConnected);

        // Act
        let json = serde_json::to_string(&env).unwrap();

        // Assert: wire field names are dictated by the device firmware
        assert!(json.contains("\"errorCode\":\"NOT_CONNECTED\""));
        assert!(json.contains("\"success\":false"));
        assert!(!json.contains("error_code"));
    }

    #[test]
    fn test_is_error_matches_code() {
        let env = Envelope::<()>::failure("denied", ErrorCode::Unauthorized);
        assert!(env.is_error(ErrorCode::Unauthorized));
        assert!(!env.is_error(ErrorCode::Timeout));
    }

    #[test]
    fn test_into_typed_converts_matching_data() {
        // Arrange
        let raw = Envelope::success(serde_json::json!({"code": 0}), "ok");

        // Act
        #[derive(Debug, PartialEq, Deserialize)]
        struct Coded {
            code: i32,
        }
        let typed: Envelope<Coded> = raw.into_typed();

        // Assert
        assert!(typed.success);
        assert_eq!(typed.data, Some(Coded { code: 0 }));
    }

    #[test]
    fn test_into_typed_mismatch_degrades_to_deserialization_error() {
        // Arrange: data is a string, target type wants a number
        let raw = Envelope::success(serde_json::json!("not a number"), "ok");

        // Act
        let typed: Envelope<u32> = raw.into_typed();

        // Assert
        assert!(!typed.success);
        assert!(typed.is_error(ErrorCode::DeserializationError));
    }

    #[test]
    fn test_command_request_path_strips_query() {
        let req = CommandRequest::get("/live?startIndex=5&numPoints=10");
        assert_eq!(req.path(), "/live");
    }

    #[test]
    fn test_command_request_query_param_lookup() {
        let req = CommandRequest::get("/live?startIndex=5&numPoints=10");
        assert_eq!(req.query_param("startIndex"), Some("5"));
        assert_eq!(req.query_param("numPoints"), Some("10"));
        assert_eq!(req.query_param("missing"), None);
    }

    #[test]
    fn test_command_request_serializes_without_null_payload() {
        let req = CommandRequest::get("/ping");
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, "{\"endpoint\":\"/ping\",\"method\":\"GET\"}");
    }
}
