//! Companion socket session.
//!
//! Opens a WebSocket to the companion process with a bounded handshake and
//! yields decoded [`CompanionMessage`]s. Reconnection is *not* handled here:
//! `hdrsync-core`'s connection manager owns the lifecycle and simply opens a
//! new [`CompanionSocket`] per attempt.
//!
//! # Example
//!
//! ```rust,ignore
//! use hdrsync_api::{ClientPlatform, CompanionClient, CompanionEndpoint};
//!
//! let client = CompanionClient::new(&CompanionEndpoint::default(), ClientPlatform::Standard)?;
//! let mut socket = client.connect().await?;
//!
//! while let Some(msg) = socket.next_message().await? {
//!     println!("{} sources", msg.sources().len());
//! }
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};
use url::Url;

use crate::endpoint::{ClientPlatform, CompanionEndpoint};
use crate::error::Error;
use crate::wire::{CompanionMessage, decode_frame};

/// Default bound on the socket handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

// ── CompanionClient ──────────────────────────────────────────────────

/// Opens socket sessions to one companion endpoint.
#[derive(Debug, Clone)]
pub struct CompanionClient {
    socket_url: Url,
    handshake_timeout: Duration,
}

impl CompanionClient {
    pub fn new(endpoint: &CompanionEndpoint, platform: ClientPlatform) -> Result<Self, Error> {
        Ok(Self {
            socket_url: endpoint.socket_url(platform)?,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Create a client for an explicit socket URL.
    pub fn from_url(socket_url: Url) -> Self {
        Self {
            socket_url,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn socket_url(&self) -> &Url {
        &self.socket_url
    }

    /// Perform the socket handshake, bounded by the handshake timeout.
    pub async fn connect(&self) -> Result<CompanionSocket, Error> {
        debug!(url = %self.socket_url, "opening companion socket");

        let handshake = tokio_tungstenite::connect_async(self.socket_url.as_str());
        let (stream, _response) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| Error::Timeout {
                timeout_ms: u64::try_from(self.handshake_timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        info!(url = %self.socket_url, "companion socket connected");
        Ok(CompanionSocket { stream })
    }
}

// ── CompanionSocket ──────────────────────────────────────────────────

/// One live socket session. Dropping it closes the TCP connection.
pub struct CompanionSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl CompanionSocket {
    /// Wait for the next well-formed message.
    ///
    /// Returns `Ok(None)` when the peer closes the socket. Malformed frames
    /// are dropped without ending the session.
    pub async fn next_message(&mut self) -> Result<Option<CompanionMessage>, Error> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if let Some(msg) = decode_or_drop(&text) {
                        return Ok(Some(msg));
                    }
                }
                Some(Ok(tungstenite::Message::Binary(bytes))) => {
                    // Some companions send JSON in binary frames.
                    if let Some(msg) = std::str::from_utf8(&bytes).ok().and_then(decode_or_drop) {
                        return Ok(Some(msg));
                    }
                }
                Some(Ok(tungstenite::Message::Ping(_))) => {
                    // tungstenite handles pong replies automatically
                    trace!("companion ping");
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    if let Some(ref cf) = frame {
                        info!(code = %cf.code, reason = %cf.reason, "companion closed socket");
                    } else {
                        info!("companion closed socket (no payload)");
                    }
                    return Ok(None);
                }
                Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                None => {
                    info!("companion socket stream ended");
                    return Ok(None);
                }
                Some(Ok(_)) => {
                    // Pong, raw Frame -- ignore
                }
            }
        }
    }

    /// Send a close frame. Best-effort.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!(error = %e, "close handshake failed");
        }
    }
}

fn decode_or_drop(text: &str) -> Option<CompanionMessage> {
    match decode_frame(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            debug!(error = %e, "dropping malformed companion frame");
            None
        }
    }
}
