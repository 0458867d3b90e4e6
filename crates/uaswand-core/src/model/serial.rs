//! Serial (COM) port descriptors and the device-recognition policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Baud rate used by all UAS-WAND serial links.
pub const WAND_BAUD_RATE: u32 = 115_200;

/// Information about one enumerated serial port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialPortDescriptor {
    /// OS port name, e.g. `COM3` or `/dev/ttyUSB0`.
    pub port_name: String,
    pub description: String,
    /// USB vendor id as four upper-case hex digits, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    /// USB product id as four upper-case hex digits, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Whether the signature policy recognized this port as a UAS-WAND.
    pub is_wand_device: bool,
    /// Whether the port could be opened exclusively at enumeration time.
    pub is_available: bool,
    pub baud_rate: u32,
    pub last_seen: DateTime<Utc>,
}

/// Pluggable recognition policy for UAS-WAND hardware on serial ports.
///
/// The exact vendor/product ids of production hardware vary by revision,
/// so matching is a value callers can replace rather than a set of
/// hardcoded constants. A port matches when its VID/PID pair equals the
/// signature's, or when its description/manufacturer contains any of the
/// keywords (case-insensitive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSignature {
    pub vendor_id: String,
    pub product_id: String,
    pub keywords: Vec<String>,
}

impl Default for DeviceSignature {
    fn default() -> Self {
        // Placeholder ids carried over from the reference firmware docs.
        Self {
            vendor_id: "064B".to_string(),
            product_id: "0006".to_string(),
            keywords: vec![
                "uas".to_string(),
                "wand".to_string(),
                "inductosense".to_string(),
            ],
        }
    }
}

impl DeviceSignature {
    /// Tests whether an enumerated port matches this signature.
    pub fn matches(
        &self,
        vendor_id: Option<&str>,
        product_id: Option<&str>,
        description: &str,
        manufacturer: Option<&str>,
    ) -> bool {
        if let (Some(vid), Some(pid)) = (vendor_id, product_id) {
            if vid.eq_ignore_ascii_case(&self.vendor_id)
                && pid.eq_ignore_ascii_case(&self.product_id)
            {
                return true;
            }
        }

        let description = description.to_ascii_lowercase();
        let manufacturer = manufacturer.unwrap_or("").to_ascii_lowercase();
        self.keywords
            .iter()
            .any(|kw| description.contains(kw.as_str()) || manufacturer.contains(kw.as_str()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matches_exact_vid_pid() {
        // Arrange
        let sig = DeviceSignature::default();

        // Act / Assert: case-insensitive hex comparison
        assert!(sig.matches(Some("064b"), Some("0006"), "USB Serial Device", None));
    }

    #[test]
    fn test_signature_matches_description_keyword() {
        let sig = DeviceSignature::default();
        assert!(sig.matches(None, None, "UAS-WAND Bootloader Port", None));
    }

    #[test]
    fn test_signature_matches_manufacturer_keyword() {
        let sig = DeviceSignature::default();
        assert!(sig.matches(None, None, "Generic CDC device", Some("Inductosense Ltd")));
    }

    #[test]
    fn test_signature_rejects_unrelated_port() {
        let sig = DeviceSignature::default();
        assert!(!sig.matches(
            Some("10C4"),
            Some("EA60"),
            "CP2102 USB to UART Bridge",
            Some("Silicon Labs"),
        ));
    }

    #[test]
    fn test_custom_signature_policy_is_honored() {
        // Arrange: a caller-supplied policy replacing the default
        let sig = DeviceSignature {
            vendor_id: "1A2B".to_string(),
            product_id: "3C4D".to_string(),
            keywords: vec!["widget".to_string()],
        };

        // Act / Assert
        assert!(sig.matches(Some("1A2B"), Some("3C4D"), "anything", None));
        assert!(sig.matches(None, None, "Widget Probe Mk II", None));
        assert!(!sig.matches(Some("064B"), Some("0006"), "UAS legacy", None));
    }
}
