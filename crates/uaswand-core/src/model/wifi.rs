//! WiFi configuration read/write pair.
//!
//! The read and write shapes are deliberately asymmetric, matching the
//! device firmware: reading returns the full configuration including the
//! channel and assigned IP, while writing accepts only SSID, password, and
//! the enable flag.

use serde::{Deserialize, Serialize};

/// Full WiFi configuration as reported by `GET /wifi`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channel: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Settings accepted by `POST /wifi`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub enable: bool,
}

impl WifiConfiguration {
    /// Applies a write request to this configuration, leaving channel and
    /// IP untouched (the device reassigns those itself).
    pub fn apply(&mut self, settings: &WifiSettings) {
        if let Some(ssid) = &settings.ssid {
            self.ssid = Some(ssid.clone());
        }
        if let Some(password) = &settings.password {
            self.password = Some(password.clone());
        }
        self.enabled = settings.enable;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> WifiConfiguration {
        WifiConfiguration {
            ssid: Some("SimulatedNetwork".to_string()),
            password: Some("admin".to_string()),
            enabled: true,
            channel: 6,
            ip_address: Some("127.0.0.1".to_string()),
        }
    }

    #[test]
    fn test_apply_overwrites_ssid_and_password() {
        // Arrange
        let mut config = base_config();
        let settings = WifiSettings {
            ssid: Some("TestNet".to_string()),
            password: Some("secret".to_string()),
            enable: true,
        };

        // Act
        config.apply(&settings);

        // Assert
        assert_eq!(config.ssid.as_deref(), Some("TestNet"));
        assert_eq!(config.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_apply_preserves_channel_and_ip() {
        // Arrange
        let mut config = base_config();
        let settings = WifiSettings {
            ssid: Some("TestNet".to_string()),
            password: None,
            enable: false,
        };

        // Act
        config.apply(&settings);

        // Assert: the write shape cannot touch channel or IP
        assert_eq!(config.channel, 6);
        assert_eq!(config.ip_address.as_deref(), Some("127.0.0.1"));
        assert!(!config.enabled);
        // Password absent in the request stays unchanged
        assert_eq!(config.password.as_deref(), Some("admin"));
    }

    #[test]
    fn test_wifi_settings_wire_field_is_enable_not_enabled() {
        let settings = WifiSettings {
            ssid: None,
            password: None,
            enable: true,
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, "{\"enable\":true}");
    }
}
