//! Progress reporting for the network discovery sweep.

use serde::{Deserialize, Serialize};

/// Incremental progress emitted while a discovery scan runs.
///
/// Produced by the discovery engine and discarded at scan end; consumers
/// that need history must keep their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    /// Human-readable description of the current step.
    pub current_step: String,
    /// Percent complete across the whole scan, 0–100.
    pub percent_complete: u8,
    pub subnets_scanned: usize,
    pub total_subnets: usize,
    /// Hosts completed in the subnet currently being swept.
    pub hosts_scanned: usize,
    pub total_hosts: usize,
    pub devices_found: usize,
    /// `a.b.c.0/24` notation of the subnet currently being swept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_subnet: Option<String>,
}

impl ScanProgress {
    /// A terminal progress record for a scan that found no interfaces.
    pub fn no_interfaces() -> Self {
        Self {
            current_step: "No active network interfaces found".to_string(),
            percent_complete: 100,
            ..Default::default()
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_interfaces_progress_is_terminal() {
        let progress = ScanProgress::no_interfaces();
        assert_eq!(progress.percent_complete, 100);
        assert_eq!(progress.total_subnets, 0);
    }

    #[test]
    fn test_scan_progress_serializes_camel_case() {
        let progress = ScanProgress {
            current_step: "Scanning subnet 192.168.1.0/24".to_string(),
            percent_complete: 50,
            subnets_scanned: 0,
            total_subnets: 1,
            hosts_scanned: 127,
            total_hosts: 254,
            devices_found: 1,
            current_subnet: Some("192.168.1.0/24".to_string()),
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"percentComplete\":50"));
        assert!(json.contains("\"currentSubnet\""));
    }
}
