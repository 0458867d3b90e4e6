//! # uaswand-host
//!
//! Host-side toolkit for UAS-WAND inspection devices: network discovery,
//! connection management, and the three transports (framed TCP, HTTP(S),
//! USB serial).
//!
//! Layering, bottom up:
//!
//! - [`transport`]: how bytes reach a device. Framed TCP and HTTP speak
//!   the shared JSON envelope protocol behind one trait; serial is its own
//!   line-oriented service.
//! - [`api`]: one typed method per firmware endpoint.
//! - [`connection`]: the connect sequence, refined state machine, and
//!   link health.
//! - [`discovery`]: subnet sweeps, endpoint validation, and the device
//!   store.
//! - [`config`] / [`cancel`]: TOML configuration and the cooperative
//!   cancellation primitives everything above uses.

pub mod api;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod transport;

pub use api::WandApi;
pub use cancel::{CancelToken, Interrupted};
pub use config::HostConfig;
pub use connection::{ConnectionEvent, ConnectionManager};
pub use discovery::{DiscoveryEngine, DiscoveryEvent, SIMULATOR_DEVICE_ID};
pub use transport::{TransportError, WandTransport};
