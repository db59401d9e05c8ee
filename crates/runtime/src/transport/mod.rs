//! Channel transports.
//!
//! A transport is a duplex, message-oriented connection carrying JSON values
//! between driver and host. Two implementations:
//!
//! - [`PipeTransport`]: length-prefixed JSON over any `AsyncRead`/`AsyncWrite`
//!   pair (pipes, TCP streams, in-memory duplex channels in tests)
//! - [`WebSocketTransport`]: the same JSON messages as WebSocket text frames
//!
//! Both split into a sending half and a receiving half so the runtime can run
//! them on independent tasks.

mod pipe;
#[cfg(test)]
mod tests;
mod websocket;

pub use pipe::{PipeTransport, PipeTransportReceiver, PipeTransportSender};
pub use websocket::{
    WebSocketTransport, WebSocketTransportReceiver, WebSocketTransportSender, connect,
};

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// Sending half of a channel transport.
pub trait Transport: Send {
    /// Writes one message to the channel.
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a channel transport.
pub trait TransportReceiver: Send {
    /// Reads messages until the channel ends, pushing each into the inbound
    /// queue handed out at construction.
    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Transport halves plus the inbound message queue, as consumed by the
/// evaluator and the dispatcher.
pub struct TransportParts {
    pub sender: Box<dyn Transport>,
    pub receiver: Box<dyn TransportReceiver>,
    pub message_rx: mpsc::UnboundedReceiver<Value>,
}
