//! # uaswand-core
//!
//! Shared library for the UAS-WAND toolkit containing the wire protocol
//! envelope and codec, the device data model, and the error taxonomy.
//!
//! This crate is used by both the host application (`uaswand-host`) and the
//! device simulator (`uaswand-sim`). It has zero dependencies on sockets,
//! serial ports, or OS APIs; everything here is pure data and pure
//! functions, which keeps the protocol independently testable.
//!
//! Modules:
//!
//! - **`protocol`**: the JSON envelope every device response uses
//!   (`success`/`data`/`message`/`errorCode`), the `{endpoint, method,
//!   payload}` command wrapper, and the length-prefixed framing helpers for
//!   the TCP transport.
//!
//! - **`model`**: typed records for devices, WiFi configuration, scan
//!   state, measurements, serial ports, and discovery progress.

pub mod model;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `uaswand_core::Envelope` instead of `uaswand_core::protocol::envelope::Envelope`.
pub use model::auth::{AuthChallenge, AuthResult};
pub use model::device::{ConnectionHealth, ConnectionState, DeviceDescriptor, DeviceKind};
pub use model::discovery::ScanProgress;
pub use model::measurement::{LiveReading, Measurement, SensorReading};
pub use model::scan::{ScanCommand, ScanStatus};
pub use model::serial::{DeviceSignature, SerialPortDescriptor};
pub use model::wifi::{WifiConfiguration, WifiSettings};
pub use protocol::codec::{
    decode_envelope, decode_request, encode_envelope, encode_request, frame, frame_len,
    CodecError, MAX_FRAME_BYTES,
};
pub use protocol::envelope::{CodedReply, CommandRequest, Envelope, ErrorCode};
