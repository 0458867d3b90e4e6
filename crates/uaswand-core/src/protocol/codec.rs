//! Pure encode/decode functions and framing helpers.
//!
//! Wire format on the framed TCP transport, symmetric in both directions:
//!
//! ```text
//! [length: u32 little-endian][payload: `length` bytes of UTF-8 JSON]
//! ```
//!
//! The JSON payload is a [`CommandRequest`] on the way out and an
//! [`Envelope`] on the way back. No function in this module performs I/O;
//! transports own the sockets and call in here for every byte they frame
//! or parse.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::protocol::envelope::{CommandRequest, Envelope, ErrorCode};

/// Maximum accepted frame payload: 10 MiB.
///
/// A declared length above this is a fatal protocol error for the
/// connection; the reader must refuse to allocate or read the payload.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Errors produced while encoding or framing protocol data.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The declared or actual payload length exceeds [`MAX_FRAME_BYTES`].
    #[error("frame length {declared} exceeds the {MAX_FRAME_BYTES}-byte limit")]
    FrameTooLarge { declared: usize },

    /// A value could not be serialized to JSON.
    #[error("JSON serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    /// An inbound request frame was not a valid `CommandRequest`.
    #[error("malformed command request: {0}")]
    MalformedRequest(#[source] serde_json::Error),
}

/// Serializes a [`CommandRequest`] to its wire JSON bytes (unframed).
pub fn encode_request(request: &CommandRequest) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(request).map_err(CodecError::Serialize)
}

/// Parses an inbound frame payload as a [`CommandRequest`].
///
/// Used by the simulator's framed server. Malformed requests are an error
/// (the connection is dropped), not a failure envelope; there is no valid
/// request to answer.
pub fn decode_request(bytes: &[u8]) -> Result<CommandRequest, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::MalformedRequest)
}

/// Serializes an [`Envelope`] to its wire JSON bytes (unframed).
pub fn encode_envelope<T: Serialize>(envelope: &Envelope<T>) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(CodecError::Serialize)
}

/// Parses a response body into an [`Envelope`].
///
/// Deserialization failures are non-fatal at this layer: the caller gets a
/// typed `DESERIALIZATION_ERROR` envelope instead of a parse error, so the
/// transport's request/response flow never has to unwind on bad device
/// output.
pub fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> Envelope<T> {
    match serde_json::from_slice::<Envelope<T>>(bytes) {
        Ok(envelope) => envelope,
        Err(e) => Envelope::failure(
            format!("failed to deserialize device response: {e}"),
            ErrorCode::DeserializationError,
        ),
    }
}

/// Wraps a payload in the 4-byte little-endian length prefix.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge {
            declared: payload.len(),
        });
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Validates a length prefix and returns the payload length to read.
///
/// The reader must call this before allocating the payload buffer so an
/// oversized declaration fails without attempting the read.
pub fn frame_len(prefix: [u8; 4]) -> Result<usize, CodecError> {
    let declared = u32::from_le_bytes(prefix) as usize;
    if declared > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge { declared });
    }
    Ok(declared)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip_preserves_success_case() {
        // Arrange
        let original = Envelope::success(serde_json::json!({"ssid": "Lab"}), "ok");

        // Act
        let bytes = encode_envelope(&original).unwrap();
        let decoded: Envelope<serde_json::Value> = decode_envelope(&bytes);

        // Assert: decode(encode(x)) == x for success envelopes
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_envelope_returns_failure_on_garbage() {
        // Act
        let decoded: Envelope<serde_json::Value> = decode_envelope(b"not json at all");

        // Assert: non-fatal: a typed failure envelope, not an Err
        assert!(!decoded.success);
        assert!(decoded.is_error(ErrorCode::DeserializationError));
    }

    #[test]
    fn test_frame_prepends_little_endian_length() {
        // Arrange
        let payload = b"{\"a\":1}";

        // Act
        let framed = frame(payload).unwrap();

        // Assert
        assert_eq!(&framed[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&framed[4..], payload);
    }

    #[test]
    fn test_frame_len_accepts_max_boundary() {
        let prefix = (MAX_FRAME_BYTES as u32).to_le_bytes();
        assert_eq!(frame_len(prefix).unwrap(), MAX_FRAME_BYTES);
    }

    #[test]
    fn test_frame_len_rejects_over_limit() {
        // Arrange: one byte past the cap
        let prefix = ((MAX_FRAME_BYTES + 1) as u32).to_le_bytes();

        // Act / Assert
        assert!(matches!(
            frame_len(prefix),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_rejects_oversized_payload_without_allocating_frame() {
        // A zero-filled 10 MiB + 1 payload must be refused.
        let payload = vec![0u8; MAX_FRAME_BYTES + 1];
        assert!(matches!(
            frame(&payload),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_request_round_trip() {
        // Arrange
        let original = CommandRequest::post("/wifi", Some(serde_json::json!({"enable": true})));

        // Act
        let bytes = encode_request(&original).unwrap();
        let decoded = decode_request(&bytes).unwrap();

        // Assert
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_request_rejects_non_request_json() {
        let result = decode_request(b"[1, 2, 3]");
        assert!(matches!(result, Err(CodecError::MalformedRequest(_))));
    }
}
