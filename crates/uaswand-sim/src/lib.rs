//! # uaswand-sim
//!
//! Protocol-compatible UAS-WAND device simulator for development and
//! integration testing without hardware.
//!
//! Two fronts serve one shared [`state::SimState`]:
//!
//! - [`framed_server`]: the length-prefixed TCP socket protocol
//! - [`http_server`]: the REST interface with Basic Auth
//!
//! Commands taken over either front act on the same simulated device, so a
//! scan started over the socket shows progress over HTTP. Both fronts bind
//! to loopback only.

pub mod framed_server;
pub mod handlers;
pub mod http_server;
pub mod state;

pub use framed_server::FramedServer;
pub use http_server::HttpServer;
pub use state::SimState;
