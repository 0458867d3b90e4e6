//! Typed data model for devices, configuration, and discovery.
//!
//! All records here are memory-resident per process run; nothing in this
//! crate persists state. Wire-facing types carry `#[serde(rename_all =
//! "camelCase")]` to match the device firmware's JSON field naming.

pub mod auth;
pub mod device;
pub mod discovery;
pub mod measurement;
pub mod scan;
pub mod serial;
pub mod wifi;
