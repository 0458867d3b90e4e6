//! Device-side measurement scan control and status.

use serde::{Deserialize, Serialize};

/// Scan control commands accepted by `POST /scan`.
///
/// Serialized as the integer the firmware expects: `{"scan": 1}` starts,
/// `{"scan": 0}` stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCommand {
    Stop,
    Start,
}

impl ScanCommand {
    /// The integer wire value.
    pub fn code(&self) -> i32 {
        match self {
            ScanCommand::Stop => 0,
            ScanCommand::Start => 1,
        }
    }

    /// Parses the integer wire value.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ScanCommand::Stop),
            1 => Some(ScanCommand::Start),
            _ => None,
        }
    }

    /// The request body for `POST /scan`.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "scan": self.code() })
    }
}

/// Scan status as reported by `GET /scan`.
///
/// `status` is the firmware's coded value: 0 = idle, 1 = scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Percent complete, 0–100.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub total_points: u32,
}

impl ScanStatus {
    pub fn is_scanning(&self) -> bool {
        self.status == 1
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_command_codes_match_firmware() {
        assert_eq!(ScanCommand::Stop.code(), 0);
        assert_eq!(ScanCommand::Start.code(), 1);
    }

    #[test]
    fn test_scan_command_payload_shape() {
        let payload = ScanCommand::Start.to_payload();
        assert_eq!(payload, serde_json::json!({"scan": 1}));
    }

    #[test]
    fn test_from_code_rejects_unknown_values() {
        assert_eq!(ScanCommand::from_code(1), Some(ScanCommand::Start));
        assert_eq!(ScanCommand::from_code(7), None);
    }

    #[test]
    fn test_scan_status_is_scanning() {
        let status = ScanStatus {
            status: 1,
            message: None,
            progress: 40,
            total_points: 512,
        };
        assert!(status.is_scanning());
    }
}
