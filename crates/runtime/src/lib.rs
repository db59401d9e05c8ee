//! tether runtime - channel transport and driver-side evaluator
//!
//! This crate provides the driver half of the tether remote-handle protocol:
//!
//! - **Transport**: duplex message framing over pipes or WebSocket
//! - **Evaluator**: request/reply correlation and event routing
//! - **Handle**: local proxies for remote objects
//! - **Discovery**: scanning host output for the channel endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  driver code │  evaluate / evaluate_handle / listeners
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │    Handle    │  disposal invariants, arg substitution
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │  Evaluator   │  request ids, pending table, event routing
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │  Transport   │  pipe / WebSocket framing
//! └──────────────┘
//! ```
//!
//! The host half lives in `tether-host`; the shared wire types in
//! `tether-protocol`.

pub mod args;
pub mod discovery;
pub mod error;
pub mod evaluator;
pub mod handle;
pub mod transport;

// Re-export key types at crate root
pub use args::{EvalArg, EvalArgs};
pub use error::{Error, Result};
pub use evaluator::{Evaluator, Listener};
pub use handle::{EmitterHandle, Handle, ReleaseOptions};
pub use transport::{
    PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts,
    TransportReceiver, WebSocketTransport, WebSocketTransportReceiver, WebSocketTransportSender,
};
