//! Wire protocol for UAS-WAND devices.
//!
//! Every response from a device, no matter whether it arrived over the
//! framed TCP socket or the HTTP API, is the same JSON
//! envelope: `{ success, data, message, errorCode, timestamp }` in lower
//! camel-case. The field naming is a wire-compatibility requirement dictated
//! by the device firmware, not a style choice.
//!
//! Requests on the framed TCP transport wrap the REST surface: the payload
//! of each frame is `{ endpoint, method, payload }`, so the same logical
//! operation ("GET /wifi") has one canonical shape on both transports.

pub mod codec;
pub mod envelope;
