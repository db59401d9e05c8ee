//! WebSocket channel transport.
//!
//! Carries the same JSON messages as the pipe framing, one message per text
//! frame. Used for the out-of-process channel between a driver and a host
//! that announced a `ws://` endpoint.

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};

use super::{Transport, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Connects to a host endpoint (`ws://…`) and returns ready-to-run parts.
pub async fn connect(url: &str) -> Result<TransportParts> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;
    tracing::debug!(url, "WebSocket channel established");
    let (transport, message_rx) = WebSocketTransport::new(stream);
    Ok(transport.into_transport_parts(message_rx))
}

/// WebSocket transport over an established stream, client- or server-side.
pub struct WebSocketTransport<S> {
    stream: WebSocketStream<S>,
    message_tx: mpsc::UnboundedSender<Value>,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an accepted or connected WebSocket stream.
    pub fn new(stream: WebSocketStream<S>) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        (Self { stream, message_tx }, message_rx)
    }

    /// Splits into independently owned sender and receiver halves.
    pub fn into_parts(self) -> (WebSocketTransportSender<S>, WebSocketTransportReceiver<S>) {
        let (sink, stream) = self.stream.split();
        (
            WebSocketTransportSender { sink },
            WebSocketTransportReceiver { stream, message_tx: self.message_tx },
        )
    }

    /// Boxes the halves into the bundle consumed by evaluator/dispatcher.
    pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
        let (sender, receiver) = self.into_parts();
        TransportParts {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
            message_rx,
        }
    }
}

/// Sending half of a WebSocket transport.
pub struct WebSocketTransportSender<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> WebSocketTransportSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Serializes and sends one message as a text frame.
    pub async fn send(&mut self, message: Value) -> Result<()> {
        let text = serde_json::to_string(&message)?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(format!("WebSocket send failed: {e}")))
    }
}

impl<S> Transport for WebSocketTransportSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { WebSocketTransportSender::send(self, message).await })
    }
}

/// Receiving half of a WebSocket transport.
pub struct WebSocketTransportReceiver<S> {
    stream: SplitStream<WebSocketStream<S>>,
    message_tx: mpsc::UnboundedSender<Value>,
}

impl<S> WebSocketTransportReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Reads frames until the peer closes, pushing each parsed message inbound.
    pub async fn run(&mut self) -> Result<()> {
        while let Some(frame) = self.stream.next().await {
            let payload = match frame {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(bytes)) => bytes,
                Ok(Message::Close(_)) => return Ok(()),
                // Ping/pong are handled by the protocol layer underneath.
                Ok(_) => continue,
                Err(e) => {
                    return Err(Error::Transport(format!("WebSocket receive failed: {e}")));
                }
            };
            let message: Value = serde_json::from_slice(&payload)?;
            if self.message_tx.send(message).is_err() {
                // Consumer is gone; nothing left to deliver to.
                return Ok(());
            }
        }
        Ok(())
    }
}

impl<S> TransportReceiver for WebSocketTransportReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { WebSocketTransportReceiver::run(self).await })
    }
}
