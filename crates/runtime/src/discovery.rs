//! Endpoint discovery for launchers.
//!
//! The host announces its channel endpoint with a single line on stdout; a
//! launcher pipes the host's output here to learn where to connect before
//! opening the channel. Address and port selection stay on the host side.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use tether_protocol::endpoint;

use crate::error::{Error, Result};

/// Scans lines of host output until the endpoint announcement appears.
///
/// Fails when the stream ends without an announcement - typically because
/// the host exited before binding its endpoint.
pub async fn wait_for_endpoint<R>(reader: R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = endpoint::parse_announcement(&line) {
            tracing::debug!(url, "host announced channel endpoint");
            return Ok(url.to_string());
        }
    }
    Err(Error::ConnectionFailed(
        "host output ended before announcing an endpoint".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_the_announcement_among_other_output() {
        let output: &[u8] =
            b"booting\nsome diagnostics\ntether host listening on ws://127.0.0.1:40123\nmore\n";
        let url = wait_for_endpoint(output).await.unwrap();
        assert_eq!(url, "ws://127.0.0.1:40123");
    }

    #[tokio::test]
    async fn fails_when_output_ends_first() {
        let output: &[u8] = b"booting\ncrashed\n";
        let result = wait_for_endpoint(output).await;
        assert!(matches!(result, Err(Error::ConnectionFailed(_))));
    }
}
