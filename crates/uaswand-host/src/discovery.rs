//! Network discovery of UAS-WAND devices.
//!
//! The engine sweeps every /24 attached to a non-loopback IPv4 interface,
//! probing a fixed port list on hosts .1 through .254 with a bounded
//! number of concurrent probes. A host with an open port is then validated
//! at the application level (ping plus identity over the framed protocol);
//! hosts that accept TCP but fail validation are kept as generic entries
//! so the operator can see what answered.
//!
//! A locally running simulator registers under a fixed identifier without
//! being swept; the loopback interface is excluded from the sweep itself.
//!
//! The device store coalesces on `(host, port)`: rediscovery updates the
//! existing entry instead of duplicating it. Reads return snapshots.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use if_addrs::IfAddr;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, info, warn};
use uaswand_core::{ConnectionState, DeviceDescriptor, DeviceKind, ScanProgress};

use crate::api::WandApi;
use crate::cancel::CancelToken;
use crate::config::DiscoveryConfig;
use crate::transport::tcp::FramedTcpTransport;
use crate::transport::WandTransport;

/// Fixed identifier for the locally running simulator's registry entry.
pub const SIMULATOR_DEVICE_ID: &str = "UAS-WAND-SIMULATOR";

/// Hosts probed per /24 sweep (.1 through .254).
const SWEEP_HOSTS: u32 = 254;

/// Emit a progress event after this many hosts.
const PROGRESS_STRIDE: usize = 32;

/// Errors from explicit discovery requests (manual add, refresh).
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid device address {0:?}")]
    InvalidAddress(String),

    #[error("no device answered at {host}:{port}")]
    Unreachable { host: String, port: u16 },
}

/// Push notifications emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    ScanStarted,
    Progress(ScanProgress),
    DeviceFound(DeviceDescriptor),
    DeviceUpdated(DeviceDescriptor),
    DeviceRemoved(String),
    ScanCompleted { devices_found: usize },
}

/// What an endpoint probe concluded.
enum ProbeOutcome {
    /// Validated UAS-WAND (or simulator) with its reported identity.
    Wand(DeviceDescriptor),
    /// The port accepted TCP but the device failed protocol validation.
    Generic,
    /// Nothing answered.
    Closed,
}

/// Discovers and tracks UAS-WAND devices on attached networks.
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    devices: Arc<Mutex<Vec<DeviceDescriptor>>>,
    scanning: AtomicBool,
    scan_cancel: StdMutex<Option<CancelToken>>,
    events: mpsc::Sender<DiscoveryEvent>,
}

impl DiscoveryEngine {
    /// Builds the engine and returns its event stream.
    pub fn new(config: DiscoveryConfig) -> (Arc<Self>, mpsc::Receiver<DiscoveryEvent>) {
        let (events, rx) = mpsc::channel(256);
        (
            Arc::new(Self {
                config,
                devices: Arc::new(Mutex::new(Vec::new())),
                scanning: AtomicBool::new(false),
                scan_cancel: StdMutex::new(None),
                events,
            }),
            rx,
        )
    }

    /// Snapshot of the known devices.
    pub async fn devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.lock().await.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Cancels a running sweep. The sweep completes cleanly with the
    /// devices found so far.
    pub fn stop_scan(&self) {
        if let Some(cancel) = self
            .scan_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            info!("discovery scan cancellation requested");
            cancel.cancel();
        }
    }

    /// Removes a device from the store.
    pub async fn remove_device(&self, host: &str, port: u16) -> bool {
        let mut devices = self.devices.lock().await;
        let mut removed_id = None;
        devices.retain(|d| {
            if d.host == host && d.port == port {
                removed_id = Some(d.device_id.clone());
                false
            } else {
                true
            }
        });
        drop(devices);

        match removed_id {
            Some(id) => {
                let _ = self.events.try_send(DiscoveryEvent::DeviceRemoved(id));
                true
            }
            None => false,
        }
    }

    /// Clears the device store.
    pub async fn clear_devices(&self) {
        let removed: Vec<String> = {
            let mut devices = self.devices.lock().await;
            let ids = devices.iter().map(|d| d.device_id.clone()).collect();
            devices.clear();
            ids
        };
        for id in removed {
            let _ = self.events.try_send(DiscoveryEvent::DeviceRemoved(id));
        }
    }

    /// Adds a device at an explicit address after a liveness probe.
    ///
    /// Re-adding a known endpoint is a no-op returning `Ok(None)`: the
    /// existing entry is left untouched and nothing is probed. Use
    /// [`refresh_devices`](Self::refresh_devices) to revalidate known
    /// entries.
    pub async fn add_device_manually(
        &self,
        host: &str,
        port: u16,
        cancel: &CancelToken,
    ) -> Result<Option<DeviceDescriptor>, DiscoveryError> {
        if host.parse::<Ipv4Addr>().is_err() {
            return Err(DiscoveryError::InvalidAddress(host.to_string()));
        }
        if port == 0 {
            return Err(DiscoveryError::InvalidAddress(format!("{host}:{port}")));
        }

        if self
            .devices
            .lock()
            .await
            .iter()
            .any(|d| d.host == host && d.port == port)
        {
            debug!(host, port, "manual add skipped, endpoint already known");
            return Ok(None);
        }

        match probe_endpoint(host, port, self.config.probe_timeout(), cancel).await {
            ProbeOutcome::Wand(descriptor) => {
                let descriptor = self.upsert(descriptor).await;
                Ok(Some(descriptor))
            }
            ProbeOutcome::Generic => {
                let mut descriptor = DeviceDescriptor::unidentified(host, port);
                descriptor.kind = DeviceKind::Generic;
                descriptor.touch(true);
                let descriptor = self.upsert(descriptor).await;
                Ok(Some(descriptor))
            }
            ProbeOutcome::Closed => Err(DiscoveryError::Unreachable {
                host: host.to_string(),
                port,
            }),
        }
    }

    /// Revalidates every known device, marking unresponsive ones offline.
    pub async fn refresh_devices(&self, cancel: &CancelToken) {
        let snapshot = self.devices().await;
        for device in snapshot {
            if cancel.is_cancelled() {
                return;
            }
            let outcome = probe_endpoint(
                &device.host,
                device.port,
                self.config.probe_timeout(),
                cancel,
            )
            .await;

            match outcome {
                ProbeOutcome::Wand(descriptor) => {
                    self.upsert(descriptor).await;
                }
                ProbeOutcome::Generic | ProbeOutcome::Closed => {
                    let mut devices = self.devices.lock().await;
                    if let Some(existing) = devices
                        .iter_mut()
                        .find(|d| d.endpoint_key() == device.endpoint_key())
                    {
                        existing.touch(matches!(outcome, ProbeOutcome::Generic));
                        existing.connection_state = ConnectionState::Disconnected;
                        let updated = existing.clone();
                        drop(devices);
                        let _ = self.events.try_send(DiscoveryEvent::DeviceUpdated(updated));
                    }
                }
            }
        }
    }

    /// Sweeps every attached /24 for devices. Returns the number of
    /// devices found during this sweep.
    ///
    /// Only one sweep runs at a time; a second call returns immediately.
    pub async fn scan_network(self: Arc<Self>) -> usize {
        if self.scanning.swap(true, Ordering::SeqCst) {
            warn!("discovery scan already running, ignoring request");
            return 0;
        }

        let cancel = CancelToken::new();
        *self.scan_cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());
        let _ = self.events.try_send(DiscoveryEvent::ScanStarted);

        let found = Arc::clone(&self).run_sweep(&cancel).await;

        *self.scan_cancel.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.scanning.store(false, Ordering::SeqCst);
        let _ = self
            .events
            .try_send(DiscoveryEvent::ScanCompleted {
                devices_found: found,
            });
        found
    }

    async fn run_sweep(self: Arc<Self>, cancel: &CancelToken) -> usize {
        let mut found = 0usize;

        // The simulator registers without being swept.
        if self.register_simulator(cancel).await {
            found += 1;
        }

        let (subnets, own_addresses) = local_subnets();
        if subnets.is_empty() {
            info!("no usable network interfaces, discovery sweep skipped");
            let _ = self
                .events
                .try_send(DiscoveryEvent::Progress(ScanProgress::no_interfaces()));
            return found;
        }

        let total_subnets = subnets.len();
        let total_hosts = total_subnets * SWEEP_HOSTS as usize;
        let hosts_scanned = Arc::new(AtomicUsize::new(0));
        let found_counter = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(self.config.probe_concurrency.max(1)));

        for (subnet_index, subnet) in subnets.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            info!(subnet = %format!("{subnet}.0/24"), "sweeping subnet");

            let mut tasks = Vec::with_capacity(SWEEP_HOSTS as usize);
            for host_octet in 1..=SWEEP_HOSTS {
                let host = format!("{subnet}.{host_octet}");
                if own_addresses.contains(&host) {
                    hosts_scanned.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                if cancel.is_cancelled() {
                    break;
                }

                let engine = Arc::clone(&self);
                let semaphore = Arc::clone(&semaphore);
                let hosts_scanned = Arc::clone(&hosts_scanned);
                let found_counter = Arc::clone(&found_counter);
                let cancel = cancel.clone();
                let ports = self.config.ports.clone();
                let probe_timeout = self.config.probe_timeout();
                let subnet = subnet.clone();
                let progress_ctx = (subnet_index, total_subnets, total_hosts);

                tasks.push(tokio::spawn(async move {
                    // The permit bounds how many probes are in flight.
                    let Ok(_permit) = semaphore.acquire().await else {
                        return;
                    };
                    if cancel.is_cancelled() {
                        return;
                    }

                    if let Some(descriptor) =
                        sweep_host(&host, &ports, probe_timeout, &cancel).await
                    {
                        found_counter.fetch_add(1, Ordering::Relaxed);
                        engine.upsert(descriptor).await;
                    }

                    let scanned = hosts_scanned.fetch_add(1, Ordering::Relaxed) + 1;
                    if scanned % PROGRESS_STRIDE == 0 {
                        let (subnet_index, total_subnets, total_hosts) = progress_ctx;
                        let percent = (scanned * 100 / total_hosts.max(1)).min(100) as u8;
                        let _ = engine.events.try_send(DiscoveryEvent::Progress(ScanProgress {
                            current_step: format!("sweeping {subnet}.0/24"),
                            percent_complete: percent,
                            subnets_scanned: subnet_index,
                            total_subnets,
                            hosts_scanned: scanned,
                            total_hosts,
                            devices_found: found_counter.load(Ordering::Relaxed),
                            current_subnet: Some(format!("{subnet}.0/24")),
                        }));
                    }
                }));
            }

            for task in tasks {
                // A panicked probe task only loses that one host.
                let _ = task.await;
            }
        }

        found + found_counter.load(Ordering::Relaxed)
    }

    /// Registers the loopback simulator if one is listening on the
    /// configured port. Called by every sweep; also callable directly so
    /// an application can pick up the simulator without a full sweep.
    pub async fn register_simulator(&self, cancel: &CancelToken) -> bool {
        let port = self.config.simulator_port;
        match probe_endpoint("127.0.0.1", port, self.config.probe_timeout(), cancel).await {
            ProbeOutcome::Wand(mut descriptor) => {
                descriptor.device_id = SIMULATOR_DEVICE_ID.to_string();
                descriptor.kind = DeviceKind::Simulator;
                debug!(port, "simulator registered");
                self.upsert(descriptor).await;
                true
            }
            _ => false,
        }
    }

    /// Inserts or updates by `(host, port)`, emitting the matching event.
    /// Returns the stored descriptor.
    async fn upsert(&self, descriptor: DeviceDescriptor) -> DeviceDescriptor {
        let mut devices = self.devices.lock().await;
        let stored = if let Some(existing) = devices
            .iter_mut()
            .find(|d| d.endpoint_key() == descriptor.endpoint_key())
        {
            // Identity fields refresh in place; the entry itself survives.
            existing.device_id = descriptor.device_id;
            existing.name = descriptor.name;
            existing.firmware_version = descriptor.firmware_version;
            existing.serial_number = descriptor.serial_number;
            existing.kind = descriptor.kind;
            existing.touch(descriptor.is_online);
            let updated = existing.clone();
            drop(devices);
            let _ = self
                .events
                .try_send(DiscoveryEvent::DeviceUpdated(updated.clone()));
            updated
        } else {
            devices.push(descriptor.clone());
            drop(devices);
            info!(
                device = %descriptor.device_id,
                endpoint = %format!("{}:{}", descriptor.host, descriptor.port),
                "device discovered"
            );
            let _ = self
                .events
                .try_send(DiscoveryEvent::DeviceFound(descriptor.clone()));
            descriptor
        };
        stored
    }
}

/// Probes one host across the port list, first hit wins.
async fn sweep_host(
    host: &str,
    ports: &[u16],
    probe_timeout: Duration,
    cancel: &CancelToken,
) -> Option<DeviceDescriptor> {
    for &port in ports {
        if cancel.is_cancelled() {
            return None;
        }
        match probe_endpoint(host, port, probe_timeout, cancel).await {
            ProbeOutcome::Wand(descriptor) => return Some(descriptor),
            ProbeOutcome::Generic => {
                let mut descriptor = DeviceDescriptor::unidentified(host, port);
                descriptor.kind = DeviceKind::Generic;
                descriptor.touch(true);
                return Some(descriptor);
            }
            ProbeOutcome::Closed => continue,
        }
    }
    None
}

/// Connects and validates one endpoint at the application level.
async fn probe_endpoint(
    host: &str,
    port: u16,
    probe_timeout: Duration,
    cancel: &CancelToken,
) -> ProbeOutcome {
    let transport = Arc::new(FramedTcpTransport::with_timeouts(
        probe_timeout,
        probe_timeout,
    ));
    if !transport.connect(host, port, cancel).await {
        return ProbeOutcome::Closed;
    }

    let api = WandApi::new(
        Arc::clone(&transport) as Arc<dyn WandTransport>,
        Duration::ZERO,
    );

    // Validation is ping plus identity; a device that accepts TCP but
    // cannot answer either is not a UAS-WAND.
    let ping = api.keep_alive(cancel).await;
    if !ping.success {
        transport.disconnect().await;
        return ProbeOutcome::Generic;
    }

    let info = api.device_info(cancel).await;
    transport.disconnect().await;

    match info.data {
        Some(mut descriptor) if info.success => {
            descriptor.host = host.to_string();
            descriptor.port = port;
            descriptor.touch(true);
            descriptor.connection_state = ConnectionState::Disconnected;
            ProbeOutcome::Wand(descriptor)
        }
        _ => ProbeOutcome::Generic,
    }
}

/// Enumerates the /24 prefixes and own addresses of the usable interfaces.
///
/// Loopback and link-local (169.254.0.0/16) interfaces are excluded.
fn local_subnets() -> (Vec<String>, BTreeSet<String>) {
    let mut subnets = BTreeSet::new();
    let mut own = BTreeSet::new();

    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(error = %e, "could not enumerate network interfaces");
            return (Vec::new(), own);
        }
    };

    for interface in interfaces {
        if interface.is_loopback() {
            continue;
        }
        let IfAddr::V4(addr) = interface.addr else {
            continue;
        };
        let ip = addr.ip;
        let octets = ip.octets();
        if octets[0] == 169 && octets[1] == 254 {
            continue;
        }
        own.insert(ip.to_string());
        subnets.insert(format!("{}.{}.{}", octets[0], octets[1], octets[2]));
    }

    (subnets.into_iter().collect(), own)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DiscoveryConfig {
        DiscoveryConfig {
            ports: vec![1],
            probe_timeout_ms: 100,
            probe_concurrency: 4,
            // A port nothing should be listening on during tests.
            simulator_port: 1,
        }
    }

    fn descriptor(id: &str, host: &str, port: u16) -> DeviceDescriptor {
        let mut d = DeviceDescriptor::unidentified(host, port);
        d.device_id = id.to_string();
        d.touch(true);
        d
    }

    #[tokio::test]
    async fn test_upsert_coalesces_on_endpoint() {
        // Arrange
        let (engine, mut events) = DiscoveryEngine::new(test_config());

        // Act: same endpoint twice, identity refreshed the second time
        engine.upsert(descriptor("UAS-A", "10.0.0.5", 80)).await;
        let mut updated = descriptor("UAS-A", "10.0.0.5", 80);
        updated.firmware_version = Some("4.0.0".to_string());
        engine.upsert(updated).await;

        // Assert: one entry, refreshed in place
        let devices = engine.devices().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].firmware_version.as_deref(), Some("4.0.0"));
        assert!(matches!(
            events.try_recv().unwrap(),
            DiscoveryEvent::DeviceFound(_)
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            DiscoveryEvent::DeviceUpdated(_)
        ));
    }

    #[tokio::test]
    async fn test_distinct_ports_are_distinct_devices() {
        let (engine, _events) = DiscoveryEngine::new(test_config());
        engine.upsert(descriptor("UAS-A", "10.0.0.5", 80)).await;
        engine.upsert(descriptor("UAS-A", "10.0.0.5", 8080)).await;
        assert_eq!(engine.devices().await.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_device_emits_event() {
        // Arrange
        let (engine, mut events) = DiscoveryEngine::new(test_config());
        engine.upsert(descriptor("UAS-A", "10.0.0.5", 80)).await;
        let _ = events.try_recv();

        // Act
        let removed = engine.remove_device("10.0.0.5", 80).await;

        // Assert
        assert!(removed);
        assert!(engine.devices().await.is_empty());
        assert_eq!(
            events.try_recv().unwrap(),
            DiscoveryEvent::DeviceRemoved("UAS-A".to_string())
        );
    }

    #[tokio::test]
    async fn test_manual_add_rejects_malformed_address() {
        let (engine, _events) = DiscoveryEngine::new(test_config());
        let cancel = CancelToken::new();

        let err = engine
            .add_device_manually("not-an-ip", 80, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidAddress(_)));

        let err = engine
            .add_device_manually("10.0.0.5", 0, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_manual_add_unreachable_endpoint_errors() {
        // Arrange: a loopback port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (engine, _events) = DiscoveryEngine::new(test_config());

        // Act
        let result = engine
            .add_device_manually("127.0.0.1", port, &CancelToken::new())
            .await;

        // Assert
        assert!(matches!(result, Err(DiscoveryError::Unreachable { .. })));
        assert!(engine.devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_open_port_without_protocol_is_generic_device() {
        // Arrange: a listener that accepts but speaks no protocol
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((_sock, _)) = listener.accept().await else {
                    return;
                };
                // Accept and hold; never answer.
            }
        });

        let (engine, _events) = DiscoveryEngine::new(test_config());

        // Act
        let added = engine
            .add_device_manually("127.0.0.1", port, &CancelToken::new())
            .await
            .unwrap()
            .unwrap();

        // Assert
        assert_eq!(added.kind, DeviceKind::Generic);
    }

    #[tokio::test]
    async fn test_manual_readd_of_known_endpoint_is_noop() {
        // Arrange: the endpoint is already in the store; nothing listens on
        // it, so any probe attempt would error instead of no-op
        let (engine, mut events) = DiscoveryEngine::new(test_config());
        engine.upsert(descriptor("UAS-A", "127.0.0.1", 9)).await;
        let _ = events.try_recv();

        // Act
        let result = engine
            .add_device_manually("127.0.0.1", 9, &CancelToken::new())
            .await
            .unwrap();

        // Assert: no-op signalled, entry untouched, no event
        assert!(result.is_none());
        let devices = engine.devices().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, "UAS-A");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_scan_before_start_is_harmless() {
        let (engine, _events) = DiscoveryEngine::new(test_config());
        engine.stop_scan();
        assert!(!engine.is_scanning());
    }
}
