//! Host channel endpoint.
//!
//! Binds a local listener, announces the endpoint on stdout, then serves one
//! WebSocket channel with a [`Dispatcher`] for its lifetime. Launching and
//! supervising the host process, and scanning its output for the
//! announcement, are the launcher's side of the contract
//! (`tether_runtime::discovery`).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;

use tether_protocol::endpoint;
use tether_runtime::transport::WebSocketTransport;

use crate::dispatcher::Dispatcher;
use crate::engine::ScriptEngine;
use crate::error::{Error, Result};
use crate::registry::Registry;

/// Environment override for the default bind address.
pub const HOST_ADDR_ENV: &str = "TETHER_HOST_ADDR";

const DEFAULT_ADDR: &str = "127.0.0.1:0";

/// Bound channel endpoint waiting for a driver.
pub struct HostServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HostServer {
    /// Binds `addr`; port 0 picks a free port.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::debug!(%local_addr, "channel endpoint bound");
        Ok(Self { listener, local_addr })
    }

    /// Binds the default address: `TETHER_HOST_ADDR` when set, else an
    /// ephemeral localhost port.
    pub async fn bind_default() -> Result<Self> {
        let addr = std::env::var(HOST_ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        Self::bind(&addr).await
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint URL drivers connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Prints the announcement line a launcher scans for.
    pub fn announce(&self) {
        println!("{}", endpoint::announcement_line(&self.url()));
    }

    /// Accepts one driver and serves the channel until it closes.
    ///
    /// The registry's event stream is wired to this channel; one registry
    /// serves one channel at a time.
    pub async fn serve(self, registry: Arc<Registry>, engine: Arc<dyn ScriptEngine>) -> Result<()> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!(%peer, "driver connected");

        let dispatcher = accept_channel(stream, registry, engine).await?;
        dispatcher.run().await;

        tracing::debug!(%peer, "channel closed");
        Ok(())
    }
}

async fn accept_channel(
    stream: TcpStream,
    registry: Arc<Registry>,
    engine: Arc<dyn ScriptEngine>,
) -> Result<Dispatcher> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| Error::Transport(format!("WebSocket handshake failed: {e}")))?;
    let (transport, message_rx) = WebSocketTransport::new(ws);
    Ok(Dispatcher::new(registry, engine, transport.into_transport_parts(message_rx)))
}
