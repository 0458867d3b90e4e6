//! Challenge/response authentication types for `GET /auth` / `POST /auth`.
//!
//! This exchange is a placeholder, not a security boundary: the device (and
//! the simulator) accept any response body as valid. Real access control on
//! the HTTP transport is the Basic Authentication header; this pair exists
//! only so firmware that issues challenges has something to talk to.

use serde::{Deserialize, Serialize};

/// Challenge issued by `GET /auth`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    /// Opaque challenge bytes, serialized as an array of numbers (the
    /// serde_json default for `Vec<u8>`), kept as the firmware emits it.
    pub challenge: Vec<u8>,
    pub challenge_id: String,
    /// Unix timestamp of challenge generation.
    pub timestamp: i64,
}

/// Result returned by `POST /auth`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Token lifetime in seconds.
    #[serde(default)]
    pub expires_in: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_result_round_trip() {
        let result = AuthResult {
            authenticated: true,
            token: Some("stub-token".to_string()),
            expires_in: 600,
            message: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: AuthResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert!(json.contains("\"expiresIn\":600"));
    }

    #[test]
    fn test_auth_challenge_serializes_challenge_id_camel_case() {
        let challenge = AuthChallenge {
            challenge: vec![1, 2, 3],
            challenge_id: "c-1".to_string(),
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_string(&challenge).unwrap();
        assert!(json.contains("\"challengeId\":\"c-1\""));
    }
}
