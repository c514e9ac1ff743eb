use thiserror::Error;

/// Top-level error type for the `hdrsync-api` crate.
///
/// Covers every failure mode when talking to the companion process:
/// the HTTP reachability probe, the socket handshake, and frame decoding.
/// `hdrsync-core` maps these into engine-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request or handshake timed out.
    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// A text frame could not be decoded into a companion message.
    #[error("Frame decoding error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    ///
    /// Every connectivity failure against the local companion is
    /// transient; only malformed input is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => {
                true
            }
            Self::InvalidUrl(_) | Self::Deserialization { .. } => false,
        }
    }

    /// Returns `true` if the peer actively refused the connection.
    pub fn is_refused(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() && !e.is_timeout(),
            _ => false,
        }
    }
}
