//! Length-prefixed JSON framing over a byte pipe.
//!
//! Frame layout: 4-byte little-endian payload length, then the JSON payload.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{Transport, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Pipe transport over an arbitrary writer/reader pair.
pub struct PipeTransport<W, R> {
    writer: W,
    reader: R,
    message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Creates the transport and the receiver for inbound messages.
    pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        (Self { writer, reader, message_tx }, message_rx)
    }

    /// Splits into independently owned sender and receiver halves.
    pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
        (
            PipeTransportSender { writer: self.writer },
            PipeTransportReceiver { reader: self.reader, message_tx: self.message_tx },
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

    /// Reads frames until the pipe ends. See [`PipeTransportReceiver::run`].
    pub async fn run(&mut self) -> Result<()> {
        read_loop(&mut self.reader, &self.message_tx).await
    }
}

/// Sending half of a pipe transport.
pub struct PipeTransportSender<W> {
    writer: W,
}

impl<W> PipeTransportSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Frames and writes one message.
    pub async fn send(&mut self, message: Value) -> Result<()> {
        let payload = serde_json::to_vec(&message)?;
        let length = payload.len() as u32;
        self.writer.write_all(&length.to_le_bytes()).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl<W> Transport for PipeTransportSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { PipeTransportSender::send(self, message).await })
    }
}

/// Receiving half of a pipe transport.
pub struct PipeTransportReceiver<R> {
    reader: R,
    message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> PipeTransportReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Reads frames until clean EOF, a read error, or the inbound queue is dropped.
    pub async fn run(&mut self) -> Result<()> {
        read_loop(&mut self.reader, &self.message_tx).await
    }
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let Self { reader, message_tx } = self;
        Box::pin(read_loop(reader, message_tx))
    }
}

async fn read_loop<R>(reader: &mut R, message_tx: &mpsc::UnboundedSender<Value>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut length_buf = [0u8; 4];
        let mut filled = 0;
        while filled < length_buf.len() {
            let n = reader
                .read(&mut length_buf[filled..])
                .await
                .map_err(|e| Error::Transport(format!("Failed to read length prefix: {e}")))?;
            if n == 0 {
                if filled == 0 {
                    // Clean EOF between frames is a normal shutdown.
                    return Ok(());
                }
                return Err(Error::Transport(
                    "Failed to read length prefix: unexpected EOF".to_string(),
                ));
            }
            filled += n;
        }

        let length = u32::from_le_bytes(length_buf) as usize;
        let mut payload = vec![0u8; length];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| Error::Transport(format!("Failed to read frame payload: {e}")))?;

        let message: Value = serde_json::from_slice(&payload)?;
        if message_tx.send(message).is_err() {
            // Consumer is gone; nothing left to deliver to.
            return Ok(());
        }
    }
}
